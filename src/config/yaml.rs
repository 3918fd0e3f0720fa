use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::realtime::ReconnectionConfig;
use crate::errors::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional so a file may set only what it needs. Values
/// present here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// backend:
///   url: "https://shop.example.com/voice"
///   request_timeout_secs: 20
///   context:
///     storeId: "eu-1"
///     locale: "de-DE"
///
/// model:
///   live_api_url: "wss://generativelanguage.googleapis.com/ws/..."
///   model: "gemini-live-2.5-flash-preview"
///   voice: "Kore"
///   system_instruction: "You are a helpful shopping assistant."
///   setup_timeout_ms: 8000
///
/// audio:
///   capture_sample_rate: 16000
///   capture_chunk_samples: 2048
///   playback_sample_rate: 24000
///
/// logs:
///   max_logs: 200
///
/// reconnection:
///   enabled: true
///   max_attempts: 3
///   initial_delay_ms: 250
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub backend: Option<BackendYaml>,
    pub model: Option<ModelYaml>,
    pub audio: Option<AudioYaml>,
    pub logs: Option<LogsYaml>,
    pub reconnection: Option<ReconnectionConfig>,
}

/// Backend wrapper connection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendYaml {
    pub url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    /// Forwarded verbatim as query parameters on every backend call
    pub context: Option<BTreeMap<String, String>>,
}

/// Live model settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ModelYaml {
    pub live_api_url: Option<String>,
    /// Overrides the model reported by the agent properties endpoint
    pub model: Option<String>,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
    pub setup_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub capture_sample_rate: Option<u32>,
    pub capture_chunk_samples: Option<usize>,
    pub playback_sample_rate: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LogsYaml {
    pub max_logs: Option<usize>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns [`ConfigError::Load`] if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Load(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::Load(format!("Failed to parse YAML config: {e}")))
    }
}
