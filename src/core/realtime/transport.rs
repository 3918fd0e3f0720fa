//! Frame transport underneath the protocol client.
//!
//! The client only sees a pair of channels. [`WebSocketTransport`] bridges
//! them to a tokio-tungstenite stream through a pump task;
//! [`ChannelTransport`] hands the far end to in-process code instead.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    self, Message,
    protocol::{CloseFrame, frame::coding::CloseCode},
};

/// Channel capacity for frames in either direction.
const FRAME_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
    Text(String),
    Binary(Bytes),
    Close { code: Option<u16>, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// The upstream refused the upgrade with an HTTP status.
    #[error("Upgrade rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, TransportError::Rejected { status: 401 | 403, .. })
    }
}

pub type InboundFrame = Result<TransportFrame, TransportError>;

/// An established connection. Dropping `outbound` closes the connection.
pub struct TransportConnection {
    pub outbound: mpsc::Sender<TransportFrame>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportConnection, TransportError>;
}

// =============================================================================
// WebSocket
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

fn map_connect_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            let message = response
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_else(|| {
                    response
                        .status()
                        .canonical_reason()
                        .unwrap_or("")
                        .to_string()
                });
            TransportError::Rejected { status, message }
        }
        tungstenite::Error::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::Handshake(other.to_string()),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<TransportConnection, TransportError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(map_connect_error)?;

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<TransportFrame>(FRAME_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<InboundFrame>(FRAME_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(frame) = outgoing else {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let is_close = matches!(frame, TransportFrame::Close { .. });
                        let msg = match frame {
                            TransportFrame::Text(text) => Message::Text(text.into()),
                            TransportFrame::Binary(data) => Message::Binary(data),
                            TransportFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code.unwrap_or(1000)),
                                reason: reason.into(),
                            })),
                        };
                        if let Err(e) = ws_sink.send(msg).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            let _ = in_tx.send(Err(TransportError::Io(e.to_string()))).await;
                            break;
                        }
                        if is_close {
                            break;
                        }
                    }

                    incoming = ws_stream.next() => {
                        let frame = match incoming {
                            Some(Ok(Message::Text(text))) => TransportFrame::Text(text.to_string()),
                            Some(Ok(Message::Binary(data))) => TransportFrame::Binary(data),
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                                continue;
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let (code, reason) = frame
                                    .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                                    .unwrap_or((None, String::new()));
                                tracing::info!("WebSocket closed by server: {:?} {}", code, reason);
                                let _ = in_tx.send(Ok(TransportFrame::Close { code, reason })).await;
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                let _ = in_tx.send(Err(TransportError::Io(e.to_string()))).await;
                                break;
                            }
                            None => break,
                        };
                        if in_tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("WebSocket pump exited");
        });

        Ok(TransportConnection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// =============================================================================
// In-process channels
// =============================================================================

/// Transport whose far end is handed to in-process code as a [`ChannelPeer`].
pub struct ChannelTransport {
    peers: mpsc::UnboundedSender<ChannelPeer>,
    fail_next: Mutex<Option<TransportError>>,
}

impl ChannelTransport {
    /// Returns the transport and a receiver yielding one peer per `connect`.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                fail_next: Mutex::new(None),
            },
            rx,
        )
    }

    /// Make the next `connect` fail with `err`.
    pub fn fail_next(&self, err: TransportError) {
        *self.fail_next.lock() = Some(err);
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self, url: &str) -> Result<TransportConnection, TransportError> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        let (out_tx, out_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        self.peers
            .send(ChannelPeer {
                url: url.to_string(),
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| TransportError::Io("peer receiver dropped".to_string()))?;
        Ok(TransportConnection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Server side of a [`ChannelTransport`] connection.
pub struct ChannelPeer {
    pub url: String,
    pub from_client: mpsc::Receiver<TransportFrame>,
    pub to_client: mpsc::Sender<InboundFrame>,
}

impl ChannelPeer {
    /// Next JSON message from the client; `None` once it closes or hangs up.
    pub async fn recv_json(&mut self) -> Option<Value> {
        match self.from_client.recv().await? {
            TransportFrame::Text(text) => serde_json::from_str(&text).ok(),
            TransportFrame::Binary(data) => serde_json::from_slice(&data).ok(),
            TransportFrame::Close { .. } => None,
        }
    }

    pub async fn send_json(&self, value: Value) -> bool {
        self.to_client
            .send(Ok(TransportFrame::Text(value.to_string())))
            .await
            .is_ok()
    }

    pub async fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client
            .send(Ok(TransportFrame::Text(text.into())))
            .await
            .is_ok()
    }

    pub async fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.to_client
            .send(Ok(TransportFrame::Close {
                code: Some(code),
                reason: reason.into(),
            }))
            .await
            .is_ok()
    }

    pub async fn fail(&self, message: impl Into<String>) -> bool {
        self.to_client
            .send(Err(TransportError::Io(message.into())))
            .await
            .is_ok()
    }
}
