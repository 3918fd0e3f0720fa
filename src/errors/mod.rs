//! Error taxonomy for the session engine.
//!
//! Each failure class has its own enum so callers can tell a fatal
//! precondition ([`ConfigError`]) from a recoverable tool failure
//! ([`ToolExecutionError`]). [`SessionError`] aggregates them for the
//! orchestrator surface.

use thiserror::Error;

/// Missing or invalid configuration. Surfaced before any connection attempt.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("No ephemeral token available; call prepare() first")]
    MissingCredential,

    #[error("No model configured for the session")]
    MissingModel,

    #[error("Tool catalog is empty or has not been loaded")]
    MissingToolCatalog,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

/// Failure to establish or drive the upstream connection.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Credential rejected by upstream: {0}")]
    AuthRejected(String),

    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    #[error("Session setup failed: {0}")]
    SetupFailed(String),

    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("Illegal connection state transition: {from} -> {to}")]
    InvalidState { from: String, to: String },

    #[error("Not connected")]
    NotConnected,
}

/// Failure of a single tool invocation. Always recovered into an error
/// response body, never propagated to the connection.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolExecutionError {
    #[error("Remote tool '{tool}' failed with status {status}: {message}")]
    Remote {
        tool: String,
        status: u16,
        message: String,
    },

    #[error("Remote tool '{tool}' request failed: {message}")]
    Transport { tool: String, message: String },

    #[error("Local tool '{tool}' failed: {message}")]
    Local { tool: String, message: String },
}

/// Inbound message that could not be mapped to a known event.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolParseError {
    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    #[error("Unrecognized message shape")]
    UnrecognizedMessage,

    #[error("Invalid audio payload: {0}")]
    InvalidAudio(String),
}

/// Microphone or speaker unavailable. Fatal to one pipeline only.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("No {0} device available")]
    NotFound(&'static str),

    #[error("Unsupported device configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to open audio stream: {0}")]
    StreamOpen(String),

    #[error("Audio stream error: {0}")]
    Stream(String),
}

/// HTTP failure talking to the backend wrapper.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// Top-level error for the orchestrator surface.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;
pub type BackendResult<T> = Result<T, BackendError>;
pub type SessionResult<T> = Result<T, SessionError>;
