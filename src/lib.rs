pub mod backend;
pub mod config;
pub mod core;
pub mod errors;
pub mod utils;

// Re-export commonly used items for convenience
pub use backend::BackendClient;
pub use config::EngineConfig;
pub use core::*;
pub use errors::{
    BackendError, ConfigError, ConnectionError, DeviceError, ProtocolParseError, SessionError,
    SessionResult, ToolExecutionError,
};
