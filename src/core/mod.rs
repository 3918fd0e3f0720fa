pub mod audio;
pub mod logs;
pub mod realtime;
pub mod session;
pub mod tools;

// Re-export commonly used types for convenience
pub use audio::{
    AudioCapture, AudioDeviceProvider, AudioPlayback, CaptureConfig, CaptureDevice,
    PlaybackConfig, PlaybackDevice,
};
pub use logs::{DEFAULT_MAX_LOGS, LogEntry, LogStore};
pub use realtime::{
    CloseReason, ConnectionState, FunctionDeclaration, InboundEvent, LiveClient,
    LiveConnectConfig, OutboundAudioChunk, ReconnectionConfig, ToolCallRequest, ToolCallResponse,
    Transport, WebSocketTransport,
};
pub use session::{LiveSession, SessionInfo};
pub use tools::{
    LocalTool, LocalToolRegistry, PendingCalls, RemoteToolExecutor, ToolDispatcher,
    ToolResponseSink,
};
