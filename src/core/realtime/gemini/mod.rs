//! Gemini Live (BidiGenerateContent) protocol.

mod client;
mod config;
pub mod messages;

pub use client::{InboundEventStream, LiveClient, OutboundHandle};
pub use config::{
    DEFAULT_SETUP_TIMEOUT, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE, EPHEMERAL_TOKEN_PREFIX,
    LIVE_API_BASE_URL, LIVE_INPUT_SAMPLE_RATE, LIVE_OUTPUT_SAMPLE_RATE, LiveConnectConfig,
    PREBUILT_VOICES, build_live_url, is_prebuilt_voice, normalize_model,
};
pub use messages::{ClientMessage, parse_server_message};
