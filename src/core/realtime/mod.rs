//! Realtime session protocol.
//!
//! - `base` holds the provider-neutral types: connection state machine,
//!   inbound events, tool call requests and responses.
//! - `transport` abstracts the frame channel under the client.
//! - `gemini` implements the Gemini Live wire protocol on top of both.
//!
//! # Audio Format
//!
//! - Input: PCM 16-bit signed little-endian, 16kHz mono, base64 encoded
//! - Output: PCM 16-bit signed little-endian, 24kHz mono

mod base;
pub mod gemini;
pub mod transport;

pub use base::{
    CREDENTIAL_EXHAUSTED_REASONS, CloseReason, ConnectionState, ConnectionStateMachine,
    FunctionDeclaration, InboundAudioChunk, InboundEvent, OutboundAudioChunk, RawProtocolError,
    ReconnectionConfig, ToolCallRequest, ToolCallResponse, TranscriptionSource,
};
pub use gemini::{InboundEventStream, LiveClient, LiveConnectConfig, OutboundHandle};
pub use transport::{
    ChannelPeer, ChannelTransport, Transport, TransportConnection, TransportError,
    TransportFrame, WebSocketTransport,
};
