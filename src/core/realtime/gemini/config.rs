//! Gemini Live endpoint constants and connect-time configuration.

use std::time::Duration;

use crate::core::realtime::base::FunctionDeclaration;

// =============================================================================
// Constants
// =============================================================================

/// Base WebSocket URL of the BidiGenerateContent service (v1alpha).
pub const LIVE_API_BASE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService";

/// Input audio sample rate expected by the Live API.
pub const LIVE_INPUT_SAMPLE_RATE: u32 = 16000;

/// Output audio sample rate produced by the Live API.
pub const LIVE_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Name prefix of ephemeral tokens issued through the auth_tokens API.
pub const EPHEMERAL_TOKEN_PREFIX: &str = "auth_tokens/";

pub const DEFAULT_VOICE: &str = "Puck";

pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Prebuilt voice names accepted by the Live API.
pub const PREBUILT_VOICES: &[&str] = &[
    "Puck", "Charon", "Kore", "Fenrir", "Aoede", "Leda", "Orus", "Zephyr",
];

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a voice shopping assistant embedded in an ecommerce storefront.
Help the user find products that fit their needs and support them through browsing, cart and checkout.
Only present products returned by the catalog tools; never invent products.
Answer briefly and conversationally. When describing a product, mention only the most relevant details.
If you do not know the answer, say so.
Do not repeat a failed function call until the user confirms.

Tool guidelines:
- search_products returns products; use a product's master variant SKU to fetch its details.
- Always pass productProjectionParameters as an empty object to search_products.
- To search by category, first read all categories, then search with categoriesSubTree:\"<category id>\".
- Prices live in the field variants.prices.centAmount.
- Quote values in where clauses, e.g. text.en-US:\"levis jeans\" or key in (\"a\",\"b\").
- When updating the cart, use the current cart version.";

// =============================================================================
// Connect configuration
// =============================================================================

/// Everything negotiated in the setup message besides the model id.
#[derive(Debug, Clone)]
pub struct LiveConnectConfig {
    /// WebSocket base URL; the method name and credential are appended.
    pub base_url: String,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
    pub tools: Vec<FunctionDeclaration>,
    pub transcribe_input: bool,
    pub transcribe_output: bool,
    /// How long to wait for `setupComplete` after the upgrade.
    pub setup_timeout: Duration,
}

impl Default for LiveConnectConfig {
    fn default() -> Self {
        Self {
            base_url: LIVE_API_BASE_URL.to_string(),
            voice: None,
            system_instruction: None,
            tools: Vec::new(),
            transcribe_input: true,
            transcribe_output: true,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }
}

/// Build the connect URL. Ephemeral tokens go to the constrained method
/// as `access_token`, plain API keys to the regular one as `key`.
pub fn build_live_url(base_url: &str, credential: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if credential.starts_with(EPHEMERAL_TOKEN_PREFIX) {
        format!(
            "{base}.BidiGenerateContentConstrained?access_token={}",
            encode_query_value(credential)
        )
    } else {
        format!(
            "{base}.BidiGenerateContent?key={}",
            encode_query_value(credential)
        )
    }
}

fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Model ids on the wire carry the `models/` prefix.
pub fn normalize_model(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

pub fn is_prebuilt_voice(voice: &str) -> bool {
    PREBUILT_VOICES.iter().any(|v| v.eq_ignore_ascii_case(voice))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_live_url_ephemeral() {
        let url = build_live_url(LIVE_API_BASE_URL, "auth_tokens/abc123");
        assert_eq!(
            url,
            "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContentConstrained?access_token=auth_tokens%2Fabc123"
        );
    }

    #[test]
    fn test_build_live_url_api_key() {
        let url = build_live_url("ws://localhost:9000/live/", "AIzaKey");
        assert_eq!(url, "ws://localhost:9000/live.BidiGenerateContent?key=AIzaKey");
    }

    #[test]
    fn test_normalize_model() {
        assert_eq!(
            normalize_model("gemini-2.0-flash-live-001"),
            "models/gemini-2.0-flash-live-001"
        );
        assert_eq!(normalize_model("models/x"), "models/x");
        assert_eq!(normalize_model(" y "), "models/y");
    }

    #[test]
    fn test_prebuilt_voice() {
        assert!(is_prebuilt_voice("puck"));
        assert!(is_prebuilt_voice("Zephyr"));
        assert!(!is_prebuilt_voice("alloy"));
    }
}
