//! Core types shared by the protocol client, the dispatcher and the session.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ConnectionError, ConnectionResult, ProtocolParseError};

/// Close reasons meaning the ephemeral credential is spent rather than the
/// session having ended.
pub const CREDENTIAL_EXHAUSTED_REASONS: [&str; 2] = [
    "Token has been used too many times",
    "new_session_expire_time deadline exceeded",
];

// =============================================================================
// Reconnection
// =============================================================================

/// Backoff policy used when a session has to be re-established with a fresh
/// credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Renew the credential and reconnect when the upstream reports it spent.
    /// Default: true
    pub enabled: bool,

    /// Maximum number of attempts before surfacing the disconnect.
    /// Set to 0 for unlimited attempts.
    /// Default: 3
    pub max_attempts: u32,

    /// Initial delay between attempts (milliseconds).
    /// Default: 250ms
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts (milliseconds).
    /// Default: 5000ms
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,

    /// Add up to 25% jitter to each delay.
    /// Default: true
    pub jitter: bool,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectionConfig {
    /// Create a config with renewal disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay in milliseconds before the given (1-based) attempt.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        if self.jitter {
            let jitter = rand_jitter(delay * 0.25);
            (delay + jitter).max(0.0) as u64
        } else {
            delay as u64
        }
    }

    /// Check if another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

/// Pseudo-random jitter in `[-range, range]` from a time-seeded LCG.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}

// =============================================================================
// Connection state
// =============================================================================

/// Lifecycle of one upstream connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed(String),
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Open)
                | (Open, Closing)
                | (Closing, Closed)
                | (Connecting, Failed(_))
                | (Open, Failed(_))
        )
    }

    /// Terminal states end the connection's lifetime.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

/// Validated state holder. `transition` is the only way to mutate the state.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    current: ConnectionState,
    history: Vec<ConnectionState>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            current: ConnectionState::Idle,
            history: vec![ConnectionState::Idle],
        }
    }

    pub fn current(&self) -> &ConnectionState {
        &self.current
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> &[ConnectionState] {
        &self.history
    }

    pub fn transition(&mut self, next: ConnectionState) -> ConnectionResult<()> {
        if !self.current.can_transition_to(&next) {
            return Err(ConnectionError::InvalidState {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!("Connection state {} -> {}", self.current, next);
        self.history.push(next.clone());
        self.current = next;
        Ok(())
    }

    /// Transition to `Failed` if the current state allows it; otherwise no-op.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        self.transition(ConnectionState::Failed(reason.into())).is_ok()
    }
}

// =============================================================================
// Tools
// =============================================================================

/// Wire-level function declaration advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl FunctionDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// A single function call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

/// The answer to one [`ToolCallRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

// =============================================================================
// Audio
// =============================================================================

/// One captured chunk ready for transmission.
#[derive(Debug, Clone)]
pub struct OutboundAudioChunk {
    /// Base64 of little-endian PCM16 mono samples.
    pub data: Arc<str>,
    pub sample_rate: u32,
    pub mime_type: Arc<str>,
    pub captured_at: Instant,
}

impl OutboundAudioChunk {
    pub fn pcm16(data: impl Into<Arc<str>>, sample_rate: u32) -> Self {
        Self {
            data: data.into(),
            sample_rate,
            mime_type: format!("audio/pcm;rate={sample_rate}").into(),
            captured_at: Instant::now(),
        }
    }
}

/// Decoded model audio, still PCM16 LE bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudioChunk {
    pub data: Bytes,
    pub mime_type: String,
}

// =============================================================================
// Inbound events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionSource {
    /// What the user said.
    Input,
    /// What the model said.
    Output,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: Option<u16>,
    pub reason: String,
    /// False when the transport dropped without a close handshake.
    pub clean: bool,
}

impl CloseReason {
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            clean: true,
        }
    }

    pub fn transport_lost(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
            clean: false,
        }
    }

    /// The credential is spent; the session may be silently re-established.
    pub fn is_credential_exhausted(&self) -> bool {
        CREDENTIAL_EXHAUSTED_REASONS
            .iter()
            .any(|r| self.reason.trim() == *r)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", self.reason, code),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Upstream payload that could not be mapped to a known event.
#[derive(Debug, Clone, PartialEq)]
pub struct RawProtocolError {
    pub error: ProtocolParseError,
    pub raw: String,
}

/// Typed event produced from one inbound wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ConnectionOpened,
    AudioChunk(InboundAudioChunk),
    Interrupted,
    TurnComplete,
    /// The model finished generating; playback of the turn may still be running.
    GenerationComplete,
    ToolCallRequest(Vec<ToolCallRequest>),
    ToolCallCancellation(Vec<String>),
    TranscriptionFragment {
        source: TranscriptionSource,
        text: String,
    },
    GoAway {
        time_left: Option<String>,
    },
    UsageMetadata(Value),
    ConnectionClosed(CloseReason),
    Error(RawProtocolError),
}

impl InboundEvent {
    /// Short tag used for log entries and tracing.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::ConnectionOpened => "server.setupComplete",
            InboundEvent::AudioChunk(_) => "server.audio",
            InboundEvent::Interrupted => "server.interrupted",
            InboundEvent::TurnComplete => "server.turnComplete",
            InboundEvent::GenerationComplete => "server.generationComplete",
            InboundEvent::ToolCallRequest(_) => "server.toolCall",
            InboundEvent::ToolCallCancellation(_) => "server.toolCallCancellation",
            InboundEvent::TranscriptionFragment {
                source: TranscriptionSource::Input,
                ..
            } => "server.inputTranscription",
            InboundEvent::TranscriptionFragment {
                source: TranscriptionSource::Output,
                ..
            } => "server.outputTranscription",
            InboundEvent::GoAway { .. } => "server.goAway",
            InboundEvent::UsageMetadata(_) => "server.usageMetadata",
            InboundEvent::ConnectionClosed(_) => "server.close",
            InboundEvent::Error(_) => "server.error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnection_delay_backoff() {
        let config = ReconnectionConfig {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(config.calculate_delay(1), 250);
        assert_eq!(config.calculate_delay(2), 500);
        assert_eq!(config.calculate_delay(3), 1000);
        assert_eq!(config.calculate_delay(10), 5000);
    }

    #[test]
    fn test_reconnection_jitter_bounds() {
        let config = ReconnectionConfig::default();
        for attempt in 1..5 {
            let base = (250.0 * 2f64.powi(attempt as i32 - 1)).min(5000.0);
            let delay = config.calculate_delay(attempt) as f64;
            assert!(delay >= base * 0.75 - 1.0 && delay <= base * 1.25 + 1.0);
        }
    }

    #[test]
    fn test_should_retry() {
        let config = ReconnectionConfig::default();
        assert!(config.should_retry(0));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
        assert!(!ReconnectionConfig::disabled().should_retry(0));

        let unlimited = ReconnectionConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(unlimited.should_retry(1000));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut sm = ConnectionStateMachine::new();
        sm.transition(ConnectionState::Connecting).unwrap();
        sm.transition(ConnectionState::Open).unwrap();
        sm.transition(ConnectionState::Closing).unwrap();
        sm.transition(ConnectionState::Closed).unwrap();
        assert_eq!(
            sm.history(),
            &[
                ConnectionState::Idle,
                ConnectionState::Connecting,
                ConnectionState::Open,
                ConnectionState::Closing,
                ConnectionState::Closed,
            ]
        );
    }

    #[test]
    fn test_no_state_skipped() {
        let mut sm = ConnectionStateMachine::new();
        assert!(sm.transition(ConnectionState::Open).is_err());
        sm.transition(ConnectionState::Connecting).unwrap();
        assert!(sm.transition(ConnectionState::Closed).is_err());
        assert!(sm.transition(ConnectionState::Closing).is_err());
        assert_eq!(sm.current(), &ConnectionState::Connecting);
    }

    #[test]
    fn test_failed_only_from_connecting_or_open() {
        let all = [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Closing,
            ConnectionState::Closed,
            ConnectionState::Failed("x".into()),
        ];
        let failed = ConnectionState::Failed("boom".into());
        for state in &all {
            let allowed = state.can_transition_to(&failed);
            let expected = matches!(state, ConnectionState::Connecting | ConnectionState::Open);
            assert_eq!(allowed, expected, "from {state}");
        }
    }

    #[test]
    fn test_fail_is_noop_when_idle() {
        let mut sm = ConnectionStateMachine::new();
        assert!(!sm.fail("nope"));
        assert_eq!(sm.current(), &ConnectionState::Idle);
    }

    #[test]
    fn test_close_reason_credential_exhausted() {
        assert!(
            CloseReason::new(Some(1008), "Token has been used too many times")
                .is_credential_exhausted()
        );
        assert!(
            CloseReason::new(Some(1011), "new_session_expire_time deadline exceeded")
                .is_credential_exhausted()
        );
        assert!(!CloseReason::new(Some(1000), "bye").is_credential_exhausted());
        assert!(!CloseReason::transport_lost("reset").is_credential_exhausted());
    }

    #[test]
    fn test_outbound_chunk_mime() {
        let chunk = OutboundAudioChunk::pcm16("AAAA", 16000);
        assert_eq!(&*chunk.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn test_function_declaration_serialization() {
        let decl = FunctionDeclaration::new("search_products", "Search the catalog")
            .with_parameters(serde_json::json!({"type": "object"}));
        let json = serde_json::to_value(&decl).unwrap();
        assert_eq!(json["name"], "search_products");
        assert_eq!(json["parameters"]["type"], "object");

        let bare: FunctionDeclaration = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert!(bare.parameters.is_none());
        assert_eq!(bare.description, "");
    }
}
