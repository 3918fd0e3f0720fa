//! Configuration for the live-assist engine
//!
//! Configuration is read from .env files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use live_assist::config::EngineConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config = EngineConfig::from_file(Path::new("live-assist.yaml"))?;
//! println!("Backend at {}", config.backend_url);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

mod yaml;

pub use yaml::{AudioYaml, BackendYaml, LogsYaml, ModelYaml, YamlConfig};

use crate::core::audio::{CaptureConfig, PlaybackConfig};
use crate::core::logs::DEFAULT_MAX_LOGS;
use crate::core::realtime::ReconnectionConfig;
use crate::core::realtime::gemini::{
    DEFAULT_SETUP_TIMEOUT, DEFAULT_SYSTEM_INSTRUCTION, LIVE_API_BASE_URL, LIVE_INPUT_SAMPLE_RATE,
    LIVE_OUTPUT_SAMPLE_RATE,
};
use crate::errors::ConfigError;
use crate::utils::{parse_stringified_json, validate_backend_url, validate_live_url};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CHUNK_SAMPLES: usize = 2048;

/// Engine configuration
///
/// Contains everything needed to prepare and run a voice session:
/// - Backend wrapper location and the context forwarded with each call
/// - Live API endpoint and model/voice overrides
/// - Audio pipeline rates and chunk size
/// - Log retention and credential renewal policy
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    // Backend wrapper
    pub backend_url: String,
    /// Flat string map sent as query parameters on every backend call
    pub context: BTreeMap<String, String>,
    pub request_timeout_secs: u64,

    // Live model
    pub live_api_url: String,
    /// Takes precedence over the model reported by the agent properties
    pub model_override: Option<String>,
    pub voice_override: Option<String>,
    pub system_instruction: String,
    pub setup_timeout_ms: u64,

    // Audio
    pub capture_sample_rate: u32,
    pub capture_chunk_samples: usize,
    pub playback_sample_rate: u32,

    pub max_logs: usize,
    pub reconnection: ReconnectionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            context: BTreeMap::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            live_api_url: LIVE_API_BASE_URL.to_string(),
            model_override: None,
            voice_override: None,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            setup_timeout_ms: DEFAULT_SETUP_TIMEOUT.as_millis() as u64,
            capture_sample_rate: LIVE_INPUT_SAMPLE_RATE,
            capture_chunk_samples: DEFAULT_CHUNK_SAMPLES,
            playback_sample_rate: LIVE_OUTPUT_SAMPLE_RATE,
            max_logs: DEFAULT_MAX_LOGS,
            reconnection: ReconnectionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// The `.env` file is loaded by the binary at startup; this reads the
    /// process environment only.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if a variable has an invalid format or
    /// the resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::env_layer()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file on top of the environment
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = Self::env_layer()?;
        config.apply_yaml(yaml_config);
        config.validate()?;
        Ok(config)
    }

    fn env_layer() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = env_string("BACKEND_URL") {
            config.backend_url = url;
        }
        if let Some(raw) = env_string("SESSION_CONTEXT") {
            config.context = parse_context(&raw)?;
        }
        if let Some(secs) = env_parse::<u64>("REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = secs;
        }
        if let Some(url) = env_string("LIVE_API_URL") {
            config.live_api_url = url;
        }
        config.model_override = env_string("AI_MODEL");
        config.voice_override = env_string("AI_VOICE");
        if let Some(instruction) = env_string("SYSTEM_INSTRUCTION") {
            config.system_instruction = instruction;
        }
        if let Some(ms) = env_parse::<u64>("SETUP_TIMEOUT_MS")? {
            config.setup_timeout_ms = ms;
        }
        if let Some(max) = env_parse::<usize>("MAX_LOGS")? {
            config.max_logs = max;
        }

        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(backend) = yaml.backend {
            if let Some(url) = backend.url {
                self.backend_url = url;
            }
            if let Some(secs) = backend.request_timeout_secs {
                self.request_timeout_secs = secs;
            }
            if let Some(context) = backend.context {
                self.context = context;
            }
        }
        if let Some(model) = yaml.model {
            if let Some(url) = model.live_api_url {
                self.live_api_url = url;
            }
            if model.model.is_some() {
                self.model_override = model.model;
            }
            if model.voice.is_some() {
                self.voice_override = model.voice;
            }
            if let Some(instruction) = model.system_instruction {
                self.system_instruction = instruction;
            }
            if let Some(ms) = model.setup_timeout_ms {
                self.setup_timeout_ms = ms;
            }
        }
        if let Some(audio) = yaml.audio {
            if let Some(rate) = audio.capture_sample_rate {
                self.capture_sample_rate = rate;
            }
            if let Some(samples) = audio.capture_chunk_samples {
                self.capture_chunk_samples = samples;
            }
            if let Some(rate) = audio.playback_sample_rate {
                self.playback_sample_rate = rate;
            }
        }
        if let Some(max) = yaml.logs.and_then(|l| l.max_logs) {
            self.max_logs = max;
        }
        if let Some(reconnection) = yaml.reconnection {
            self.reconnection = reconnection;
        }
    }

    /// Check URLs and numeric ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_backend_url(&self.backend_url)
            .map_err(|e| ConfigError::Invalid(format!("backend_url: {e}")))?;
        validate_live_url(&self.live_api_url)
            .map_err(|e| ConfigError::Invalid(format!("live_api_url: {e}")))?;

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.setup_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "setup_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_logs == 0 {
            return Err(ConfigError::Invalid(
                "max_logs must be greater than 0".to_string(),
            ));
        }
        if !(8000..=48000).contains(&self.capture_sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "capture_sample_rate {} outside 8000..=48000",
                self.capture_sample_rate
            )));
        }
        if !(8000..=48000).contains(&self.playback_sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "playback_sample_rate {} outside 8000..=48000",
                self.playback_sample_rate
            )));
        }
        if self.capture_chunk_samples == 0 {
            return Err(ConfigError::Invalid(
                "capture_chunk_samples must be greater than 0".to_string(),
            ));
        }
        if self.reconnection.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "reconnection.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_sample_rate: self.capture_sample_rate,
            chunk_samples: self.capture_chunk_samples,
            ..Default::default()
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            input_sample_rate: self.playback_sample_rate,
            ..Default::default()
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::Invalid(format!("{key}: {e}")))
        })
        .transpose()
}

/// Parse a session context map from a JSON object. A JSON string holding
/// the object is accepted too. Non-string values are kept as their JSON text.
pub fn parse_context(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let Some(Value::Object(map)) = parse_stringified_json(raw) else {
        return Err(ConfigError::Invalid(
            "SESSION_CONTEXT must be a JSON object".to_string(),
        ));
    };

    Ok(map
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        unsafe {
            for key in [
                "BACKEND_URL",
                "SESSION_CONTEXT",
                "REQUEST_TIMEOUT_SECS",
                "LIVE_API_URL",
                "AI_MODEL",
                "AI_VOICE",
                "SYSTEM_INSTRUCTION",
                "SETUP_TIMEOUT_MS",
                "MAX_LOGS",
            ] {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.backend_url, "http://localhost:8080");
        assert_eq!(config.max_logs, 100);
        assert_eq!(config.setup_timeout(), Duration::from_secs(10));
        assert_eq!(config.capture_config().chunk_samples, 2048);
        assert_eq!(config.playback_config().input_sample_rate, 24000);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_variables() {
        cleanup_env_vars();
        unsafe {
            env::set_var("BACKEND_URL", "https://shop.example.com/voice");
            env::set_var("SESSION_CONTEXT", r#"{"storeId":"eu-1","tier":2}"#);
            env::set_var("AI_MODEL", "gemini-live-2.5-flash-preview");
            env::set_var("AI_VOICE", "Kore");
            env::set_var("MAX_LOGS", "50");
        }

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.backend_url, "https://shop.example.com/voice");
        assert_eq!(config.context.get("storeId").map(String::as_str), Some("eu-1"));
        assert_eq!(config.context.get("tier").map(String::as_str), Some("2"));
        assert_eq!(
            config.model_override.as_deref(),
            Some("gemini-live-2.5-flash-preview")
        );
        assert_eq!(config.voice_override.as_deref(), Some("Kore"));
        assert_eq!(config.max_logs, 50);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("REQUEST_TIMEOUT_SECS", "soon");
        }

        let err = EngineConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("REQUEST_TIMEOUT_SECS"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
backend:
  url: "https://yaml.example.com"
  context:
    storeId: "yaml-store"
model:
  voice: "Charon"
logs:
  max_logs: 10
reconnection:
  enabled: false
"#,
        )
        .unwrap();

        unsafe {
            env::set_var("BACKEND_URL", "https://env.example.com");
            env::set_var("AI_MODEL", "env-model");
            env::set_var("AI_VOICE", "Kore");
        }

        let config = EngineConfig::from_file(&config_path).unwrap();
        // YAML overrides ENV
        assert_eq!(config.backend_url, "https://yaml.example.com");
        assert_eq!(config.voice_override.as_deref(), Some("Charon"));
        assert_eq!(
            config.context.get("storeId").map(String::as_str),
            Some("yaml-store")
        );
        // ENV value kept where YAML is silent
        assert_eq!(config.model_override.as_deref(), Some("env-model"));
        assert_eq!(config.max_logs, 10);
        assert!(!config.reconnection.enabled);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_validation_failure() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
model:
  live_api_url: "https://not-a-websocket.example.com"
"#,
        )
        .unwrap();

        let err = EngineConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("live_api_url"));

        cleanup_env_vars();
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = EngineConfig {
            max_logs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_logs = 1;
        config.capture_sample_rate = 4000;
        assert!(config.validate().is_err());

        config.capture_sample_rate = 16000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_context_accepts_string_wrapped_json() {
        let context = parse_context(r#""{\"storeId\":\"eu-1\"}""#).unwrap();
        assert_eq!(context.get("storeId").map(String::as_str), Some("eu-1"));

        assert!(parse_context("[1,2]").is_err());
        assert!(parse_context("storeId=eu-1").is_err());
    }
}
