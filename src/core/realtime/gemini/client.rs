//! Gemini Live protocol client.
//!
//! One [`LiveClient`] drives one connection at a time:
//!
//! - `connect` opens the transport, sends `setup` and waits for
//!   `setupComplete` before reporting `Open`.
//! - A reader task parses every inbound frame into one [`InboundEvent`] and
//!   forwards it, in arrival order, to the [`InboundEventStream`].
//! - A writer task drains two independent queues, tool responses first and
//!   audio second, so a burst of microphone audio never delays a tool reply.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut client = LiveClient::new(Arc::new(WebSocketTransport::new()), LogStore::default());
//! client.connect("gemini-live-2.5-flash", &config, token.as_str()).await?;
//! let mut events = client.events().unwrap();
//! while let Some(event) = events.next_event().await {
//!     // ...
//! }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::{LiveConnectConfig, build_live_url, normalize_model};
use super::messages::{ClientMessage, parse_server_message};
use crate::core::logs::LogStore;
use crate::core::realtime::base::{
    CloseReason, ConnectionState, ConnectionStateMachine, InboundEvent, OutboundAudioChunk,
    ToolCallResponse,
};
use crate::core::realtime::transport::{InboundFrame, Transport, TransportFrame};
use crate::errors::{ConnectionError, ConnectionResult};

const AUDIO_QUEUE_CAPACITY: usize = 64;
const TOOL_QUEUE_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Close code sent on an intentional disconnect.
const NORMAL_CLOSURE: u16 = 1000;

// =============================================================================
// Outbound handle
// =============================================================================

/// Cloneable sender for the two outbound queues of one connection.
#[derive(Clone)]
pub struct OutboundHandle {
    audio_tx: mpsc::Sender<OutboundAudioChunk>,
    tool_tx: mpsc::Sender<Vec<ToolCallResponse>>,
}

impl OutboundHandle {
    /// Queue an audio chunk without waiting. A full queue drops the chunk.
    pub fn send_audio(&self, chunk: OutboundAudioChunk) -> ConnectionResult<()> {
        match self.audio_tx.try_send(chunk) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound audio queue full, dropping chunk");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ConnectionError::NotConnected),
        }
    }

    /// Queue one batched tool response message. Empty batches are not sent.
    pub async fn send_tool_responses(
        &self,
        responses: Vec<ToolCallResponse>,
    ) -> ConnectionResult<()> {
        if responses.is_empty() {
            return Ok(());
        }
        self.tool_tx
            .send(responses)
            .await
            .map_err(|_| ConnectionError::NotConnected)
    }

    pub fn is_closed(&self) -> bool {
        self.tool_tx.is_closed()
    }
}

// =============================================================================
// Event stream
// =============================================================================

/// Events of one connection. Ends after the connection closes.
pub struct InboundEventStream {
    rx: mpsc::Receiver<InboundEvent>,
}

impl InboundEventStream {
    pub async fn next_event(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }
}

impl Stream for InboundEventStream {
    type Item = InboundEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// =============================================================================
// Client
// =============================================================================

pub struct LiveClient {
    transport: Arc<dyn Transport>,
    logs: LogStore,
    state: Arc<Mutex<ConnectionStateMachine>>,
    outbound: Option<OutboundHandle>,
    events: Option<InboundEventStream>,
    transport_tx: Option<mpsc::Sender<TransportFrame>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveClient {
    pub fn new(transport: Arc<dyn Transport>, logs: LogStore) -> Self {
        Self {
            transport,
            logs,
            state: Arc::new(Mutex::new(ConnectionStateMachine::new())),
            outbound: None,
            events: None,
            transport_tx: None,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().current().clone()
    }

    /// States visited by the current connection, starting at `Idle`.
    pub fn state_history(&self) -> Vec<ConnectionState> {
        self.state.lock().history().to_vec()
    }

    pub fn is_open(&self) -> bool {
        *self.state.lock().current() == ConnectionState::Open
    }

    /// Take the event stream of the current connection. Returns `None` if it
    /// was already taken or no connection was made.
    pub fn events(&mut self) -> Option<InboundEventStream> {
        self.events.take()
    }

    pub fn outbound(&self) -> Option<OutboundHandle> {
        self.outbound.clone()
    }

    pub fn send_audio(&self, chunk: OutboundAudioChunk) -> ConnectionResult<()> {
        self.outbound
            .as_ref()
            .ok_or(ConnectionError::NotConnected)?
            .send_audio(chunk)
    }

    pub async fn send_tool_responses(&self, responses: Vec<ToolCallResponse>) -> ConnectionResult<()> {
        self.outbound
            .as_ref()
            .ok_or(ConnectionError::NotConnected)?
            .send_tool_responses(responses)
            .await
    }

    /// Open a connection and complete the setup handshake.
    ///
    /// A client that reached a terminal state starts a fresh lifecycle.
    pub async fn connect(
        &mut self,
        model: &str,
        config: &LiveConnectConfig,
        credential: &str,
    ) -> ConnectionResult<()> {
        if model.trim().is_empty() {
            return Err(ConnectionError::InvalidConfig(
                "model id is required".to_string(),
            ));
        }
        if config.tools.is_empty() {
            return Err(ConnectionError::InvalidConfig(
                "at least one tool declaration is required".to_string(),
            ));
        }

        {
            let mut state = self.state.lock();
            if state.current().is_terminal() {
                *state = ConnectionStateMachine::new();
            }
            state.transition(ConnectionState::Connecting)?;
        }

        match self.open(model, config, credential).await {
            Ok(()) => {
                tracing::info!("Connected to Gemini Live ({})", normalize_model(model));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Gemini Live connect failed: {}", e);
                self.state.lock().fail(e.to_string());
                self.logs.push("client.error", e.to_string());
                Err(e)
            }
        }
    }

    async fn open(
        &mut self,
        model: &str,
        config: &LiveConnectConfig,
        credential: &str,
    ) -> ConnectionResult<()> {
        let url = build_live_url(&config.base_url, credential);
        let connection = self.transport.connect(&url).await.map_err(|e| {
            if e.is_auth_rejection() {
                ConnectionError::AuthRejected(e.to_string())
            } else {
                ConnectionError::Unreachable(e.to_string())
            }
        })?;
        let transport_tx = connection.outbound;
        let mut transport_rx = connection.inbound;

        let setup = ClientMessage::setup(model, config);
        let json = serde_json::to_string(&setup)
            .map_err(|e| ConnectionError::InvalidConfig(e.to_string()))?;
        self.logs.push(setup.kind(), normalize_model(model));
        transport_tx
            .send(TransportFrame::Text(json))
            .await
            .map_err(|_| ConnectionError::SetupFailed("transport closed before setup".into()))?;

        tokio::time::timeout(
            config.setup_timeout,
            await_setup_complete(&mut transport_rx, &self.logs),
        )
        .await
        .map_err(|_| ConnectionError::SetupFailed("timed out waiting for setupComplete".into()))??;

        self.state.lock().transition(ConnectionState::Open)?;

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_CAPACITY);
        let (tool_tx, tool_rx) = mpsc::channel(TOOL_QUEUE_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Receivers of this connection must see the open before anything else.
        let _ = events_tx.send(InboundEvent::ConnectionOpened).await;

        self.shutdown = CancellationToken::new();
        let writer = tokio::spawn(run_writer(
            audio_rx,
            tool_rx,
            transport_tx.clone(),
            self.logs.clone(),
            self.shutdown.clone(),
        ));
        let reader = tokio::spawn(run_reader(
            transport_rx,
            events_tx,
            self.state.clone(),
            self.logs.clone(),
            self.shutdown.clone(),
        ));
        self.tasks = vec![writer, reader];
        self.transport_tx = Some(transport_tx);
        self.outbound = Some(OutboundHandle { audio_tx, tool_tx });
        self.events = Some(InboundEventStream { rx: events_rx });
        Ok(())
    }

    /// Close the connection. Queued outbound messages are discarded.
    pub fn disconnect(&mut self) {
        let was_open = {
            let mut state = self.state.lock();
            *state.current() == ConnectionState::Open
                && state.transition(ConnectionState::Closing).is_ok()
        };

        self.shutdown.cancel();
        self.outbound = None;
        if let Some(tx) = self.transport_tx.take()
            && was_open
        {
            let _ = tx.try_send(TransportFrame::Close {
                code: Some(NORMAL_CLOSURE),
                reason: "client disconnect".to_string(),
            });
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }

        if was_open {
            let _ = self.state.lock().transition(ConnectionState::Closed);
            self.logs.push("client.close", "");
            tracing::info!("Disconnected from Gemini Live");
        }
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Whether a close received before `setupComplete` means the credential was refused.
fn is_auth_close(code: Option<u16>, reason: &str) -> bool {
    if matches!(code, Some(1008) | Some(4001) | Some(4003)) {
        return true;
    }
    let reason = reason.to_ascii_lowercase();
    ["api key", "token", "unauthorized", "unauthenticated", "permission", "auth"]
        .iter()
        .any(|needle| reason.contains(needle))
}

async fn await_setup_complete(
    transport_rx: &mut mpsc::Receiver<InboundFrame>,
    logs: &LogStore,
) -> ConnectionResult<()> {
    loop {
        let text = match transport_rx.recv().await {
            None => {
                return Err(ConnectionError::SetupFailed(
                    "connection dropped during setup".to_string(),
                ));
            }
            Some(Err(e)) => return Err(ConnectionError::SetupFailed(e.to_string())),
            Some(Ok(TransportFrame::Close { code, reason })) => {
                logs.push("server.close", CloseReason::new(code, reason.clone()).to_string());
                return Err(if is_auth_close(code, &reason) {
                    ConnectionError::AuthRejected(reason)
                } else {
                    ConnectionError::SetupFailed(format!("closed during setup: {reason}"))
                });
            }
            Some(Ok(TransportFrame::Text(text))) => text,
            Some(Ok(TransportFrame::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
        };

        match parse_server_message(&text) {
            InboundEvent::ConnectionOpened => {
                logs.push("server.setupComplete", "");
                return Ok(());
            }
            other => tracing::debug!("Ignoring {} before setupComplete", other.kind()),
        }
    }
}

fn event_log_payload(event: &InboundEvent, raw: &str) -> String {
    match event {
        InboundEvent::AudioChunk(chunk) => format!("{} ({} bytes)", chunk.mime_type, chunk.data.len()),
        InboundEvent::TranscriptionFragment { text, .. } => text.clone(),
        InboundEvent::Interrupted
        | InboundEvent::TurnComplete
        | InboundEvent::GenerationComplete
        | InboundEvent::ConnectionOpened => String::new(),
        _ => raw.to_string(),
    }
}

async fn run_reader(
    mut transport_rx: mpsc::Receiver<InboundFrame>,
    events_tx: mpsc::Sender<InboundEvent>,
    state: Arc<Mutex<ConnectionStateMachine>>,
    logs: LogStore,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = transport_rx.recv() => frame,
        };

        let raw = match frame {
            Some(Ok(TransportFrame::Text(text))) => text,
            Some(Ok(TransportFrame::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
            Some(Ok(TransportFrame::Close { code, reason })) => {
                let reason = CloseReason::new(code, reason);
                logs.push("server.close", reason.to_string());
                let closed = {
                    let mut state = state.lock();
                    state.transition(ConnectionState::Closing).is_ok()
                        && state.transition(ConnectionState::Closed).is_ok()
                };
                if closed {
                    tracing::info!("Gemini Live closed by server: {}", reason);
                    let _ = events_tx.send(InboundEvent::ConnectionClosed(reason)).await;
                }
                break;
            }
            Some(Err(e)) => {
                connection_lost(&state, &logs, &events_tx, e.to_string()).await;
                break;
            }
            None => {
                connection_lost(&state, &logs, &events_tx, "connection dropped".to_string()).await;
                break;
            }
        };

        let event = parse_server_message(&raw);
        if let InboundEvent::Error(err) = &event {
            tracing::warn!("Unrecognized server message: {}", err.error);
        }
        logs.push(event.kind(), event_log_payload(&event, &raw));
        if events_tx.send(event).await.is_err() {
            tracing::debug!("Event stream dropped; discarding inbound event");
        }
    }
    shutdown.cancel();
}

async fn connection_lost(
    state: &Mutex<ConnectionStateMachine>,
    logs: &LogStore,
    events_tx: &mpsc::Sender<InboundEvent>,
    message: String,
) {
    logs.push("server.close", message.clone());
    if state.lock().fail(message.clone()) {
        tracing::error!("Gemini Live connection lost: {}", message);
        let _ = events_tx
            .send(InboundEvent::ConnectionClosed(CloseReason::transport_lost(message)))
            .await;
    }
}

async fn run_writer(
    mut audio_rx: mpsc::Receiver<OutboundAudioChunk>,
    mut tool_rx: mpsc::Receiver<Vec<ToolCallResponse>>,
    transport_tx: mpsc::Sender<TransportFrame>,
    logs: LogStore,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(responses) = tool_rx.recv() => ClientMessage::tool_response(responses),
            Some(chunk) = audio_rx.recv() => ClientMessage::audio(&chunk),
            else => break,
        };

        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize {}: {}", message.kind(), e);
                continue;
            }
        };

        let payload = match &message {
            ClientMessage::RealtimeInput(input) => input
                .media_chunks
                .iter()
                .map(|b| format!("{} ({} b64 chars)", b.mime_type, b.data.len()))
                .collect::<Vec<_>>()
                .join(", "),
            _ => json.clone(),
        };
        logs.push(message.kind(), payload);

        if transport_tx.send(TransportFrame::Text(json)).await.is_err() {
            tracing::debug!("Transport closed; writer exiting");
            break;
        }
    }
}
