//! Per-session event loop.
//!
//! One task owns everything a live connection needs: the protocol client,
//! both audio pipelines and the in-flight tool dispatches. It routes
//! inbound events in arrival order and tears the pipelines down when the
//! connection ends or the session is shut down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::SessionShared;
use crate::backend::{CredentialProvider, SessionBackend};
use crate::core::audio::{AudioCapture, AudioDeviceProvider, AudioPlayback, PlaybackConfig};
use crate::core::realtime::{
    CloseReason, InboundEvent, InboundEventStream, LiveClient, LiveConnectConfig,
    OutboundAudioChunk, OutboundHandle, ReconnectionConfig, Transport,
};
use crate::core::tools::{PendingCalls, ToolDispatcher};
use crate::errors::ConnectionError;

/// What a renewed connection is built from.
pub(super) struct ConnectParams {
    pub backend: Arc<dyn SessionBackend>,
    pub transport: Arc<dyn Transport>,
    pub devices: Arc<dyn AudioDeviceProvider>,
    pub model: String,
    pub live_config: LiveConnectConfig,
    pub playback_config: PlaybackConfig,
    pub reconnection: ReconnectionConfig,
}

/// A connection and the playback bound to it.
pub(super) struct Connection {
    pub client: LiveClient,
    pub events: InboundEventStream,
    pub outbound: OutboundHandle,
    pub playback: Option<Arc<AudioPlayback>>,
}

enum Flow {
    Continue,
    Stop,
}

enum Renewal {
    Renewed(Connection),
    Failed(String),
    Shutdown,
}

pub(super) struct SessionLoop {
    pub id: Uuid,
    pub shared: Arc<SessionShared>,
    pub params: ConnectParams,
    pub connection: Connection,
    pub capture: Option<AudioCapture>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub pending: PendingCalls,
    pub shutdown: CancellationToken,
}

impl SessionLoop {
    pub async fn run(mut self) {
        let mut dispatches: JoinSet<()> = JoinSet::new();
        let mut muted_rx = self.shared.muted.subscribe();
        let mut audio_rx = self.capture.as_ref().map(AudioCapture::subscribe);
        let mut capture_volume = self.capture.as_ref().map(AudioCapture::volume);

        loop {
            let flow = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    tracing::debug!(session_id = %self.id, "Session shutdown requested");
                    Flow::Stop
                }

                event = self.connection.events.next_event() => match event {
                    Some(event) => self.handle_event(event, &mut dispatches).await,
                    None => {
                        self.surface("Connection ended without a close frame".to_string());
                        Flow::Stop
                    }
                },

                Some(result) = dispatches.join_next() => {
                    if let Err(e) = result
                        && e.is_panic()
                    {
                        tracing::error!(session_id = %self.id, "Tool dispatch panicked");
                    }
                    Flow::Continue
                }

                Ok(()) = muted_rx.changed() => {
                    let muted = *muted_rx.borrow_and_update();
                    self.apply_mute(muted);
                    Flow::Continue
                }

                chunk = next_chunk(&mut audio_rx) => {
                    self.forward_audio(chunk);
                    Flow::Continue
                }

                level = next_level(&mut capture_volume) => {
                    self.shared.input_volume.send_replace(level);
                    Flow::Continue
                }
            };

            if let Flow::Stop = flow {
                break;
            }
        }

        self.teardown(&mut dispatches);
    }

    async fn handle_event(&mut self, event: InboundEvent, dispatches: &mut JoinSet<()>) -> Flow {
        match event {
            InboundEvent::ConnectionOpened => {
                tracing::debug!(session_id = %self.id, "Connection opened");
            }
            InboundEvent::AudioChunk(chunk) => {
                if let Some(playback) = &self.connection.playback {
                    playback.add_chunk(&chunk.data);
                }
            }
            InboundEvent::Interrupted => {
                tracing::debug!(session_id = %self.id, "Model turn interrupted");
                if let Some(playback) = &self.connection.playback {
                    playback.stop();
                }
            }
            InboundEvent::ToolCallRequest(batch) => {
                tracing::info!(
                    session_id = %self.id,
                    "Tool call batch: {}",
                    batch.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
                );
                self.pending.register(&batch);
                let dispatcher = self.dispatcher.clone();
                let outbound = self.connection.outbound.clone();
                dispatches.spawn(async move {
                    if let Err(e) = dispatcher.dispatch(batch, &outbound).await {
                        tracing::warn!("Tool responses not sent: {}", e);
                    }
                });
            }
            InboundEvent::ToolCallCancellation(ids) => {
                let cancelled = self.pending.cancel(&ids);
                tracing::info!(
                    session_id = %self.id,
                    "Cancelled {} of {} tool calls",
                    cancelled,
                    ids.len()
                );
            }
            InboundEvent::GoAway { time_left } => {
                tracing::warn!(
                    session_id = %self.id,
                    "Server will close the connection (time left: {})",
                    time_left.as_deref().unwrap_or("unknown")
                );
            }
            InboundEvent::Error(err) => {
                tracing::warn!(session_id = %self.id, "Protocol error: {}", err.error);
            }
            InboundEvent::ConnectionClosed(reason) => return self.on_close(reason, dispatches).await,
            InboundEvent::TurnComplete => {
                tracing::trace!(session_id = %self.id, "{}", event.kind());
                if let Some(playback) = &self.connection.playback {
                    playback.finish_turn();
                }
            }
            InboundEvent::GenerationComplete
            | InboundEvent::TranscriptionFragment { .. }
            | InboundEvent::UsageMetadata(_) => {
                tracing::trace!(session_id = %self.id, "{}", event.kind());
            }
        }
        Flow::Continue
    }

    async fn on_close(&mut self, reason: CloseReason, dispatches: &mut JoinSet<()>) -> Flow {
        if !(reason.is_credential_exhausted() && self.params.reconnection.enabled) {
            self.surface(format!("Connection closed: {reason}"));
            return Flow::Stop;
        }

        tracing::info!(session_id = %self.id, "Credential exhausted ({}); renewing", reason.reason);
        self.shared.logs.push("session.renew", reason.reason.clone());

        // Calls of the old connection can no longer be answered.
        dispatches.abort_all();
        self.pending.clear();
        if let Some(playback) = self.connection.playback.take() {
            playback.stop();
        }

        match self.renew().await {
            Renewal::Renewed(connection) => {
                self.connection = connection;
                self.shared.set_playback(self.connection.playback.clone());
                self.shared.logs.push("session.renewed", "");
                tracing::info!(session_id = %self.id, "Session renewed");
                Flow::Continue
            }
            Renewal::Failed(message) => {
                self.surface(format!("Connection closed: {reason}; renewal failed: {message}"));
                Flow::Stop
            }
            Renewal::Shutdown => Flow::Stop,
        }
    }

    async fn renew(&mut self) -> Renewal {
        let policy = &self.params.reconnection;
        let mut attempt: u32 = 1;
        loop {
            let delay = Duration::from_millis(policy.calculate_delay(attempt));
            tokio::select! {
                _ = self.shutdown.cancelled() => return Renewal::Shutdown,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return Renewal::Shutdown,
                result = open_connection(&self.params, &self.shared) => result,
            };

            match result {
                Ok(connection) => return Renewal::Renewed(connection),
                Err(message) => {
                    tracing::warn!(
                        session_id = %self.id,
                        "Renewal attempt {} failed: {}",
                        attempt,
                        message
                    );
                    if !policy.should_retry(attempt) {
                        return Renewal::Failed(message);
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn forward_audio(&self, chunk: Result<OutboundAudioChunk, broadcast::error::RecvError>) {
        match chunk {
            Ok(chunk) => {
                // NotConnected only happens while a closed connection is being replaced.
                if let Err(e) = self.connection.outbound.send_audio(chunk) {
                    tracing::debug!("Dropping captured chunk: {}", e);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Capture outpaced the session loop; skipped {} chunks", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {}
        }
    }

    fn apply_mute(&mut self, muted: bool) {
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        if muted {
            capture.stop();
            self.shared.input_volume.send_replace(0.0);
            self.shared.logs.push("session.mute", "muted");
        } else {
            if let Err(e) = capture.start() {
                self.shared.device_error("capture", &e);
            }
            self.shared.logs.push("session.mute", "unmuted");
        }
    }

    /// End the session because of `message`: the disconnect is visible to
    /// the caller through `connected` and the last error.
    fn surface(&self, message: String) {
        tracing::warn!(session_id = %self.id, "{}", message);
        self.shared.logs.push("session.closed", message.clone());
        self.shared.set_last_error(message);
        self.shared.set_connected(false);
    }

    fn teardown(&mut self, dispatches: &mut JoinSet<()>) {
        if let Some(capture) = self.capture.as_mut() {
            capture.stop();
        }
        if let Some(playback) = self.connection.playback.take() {
            playback.stop();
        }
        self.connection.client.disconnect();
        dispatches.abort_all();
        self.pending.clear();

        self.shared.set_playback(None);
        self.shared.input_volume.send_replace(0.0);
        tracing::info!(session_id = %self.id, "Session torn down");
    }
}

async fn next_chunk(
    rx: &mut Option<broadcast::Receiver<OutboundAudioChunk>>,
) -> Result<OutboundAudioChunk, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_level(rx: &mut Option<watch::Receiver<f32>>) -> f32 {
    let Some(inner) = rx else {
        return std::future::pending().await;
    };
    if inner.changed().await.is_err() {
        *rx = None;
        return std::future::pending().await;
    }
    *inner.borrow_and_update()
}

/// Fetch a credential, open a connection and bind a fresh playback to it.
pub(super) async fn open_connection(
    params: &ConnectParams,
    shared: &SessionShared,
) -> Result<Connection, String> {
    let token = params
        .backend
        .ephemeral_token()
        .await
        .map_err(|e| e.to_string())?;
    connect_with_token(params, shared, token.as_str())
        .await
        .map_err(|e| e.to_string())
}

pub(super) async fn connect_with_token(
    params: &ConnectParams,
    shared: &SessionShared,
    credential: &str,
) -> Result<Connection, ConnectionError> {
    let mut client = LiveClient::new(params.transport.clone(), shared.logs.clone());
    client
        .connect(&params.model, &params.live_config, credential)
        .await?;

    let (Some(events), Some(outbound)) = (client.events(), client.outbound()) else {
        return Err(ConnectionError::NotConnected);
    };

    let playback = match params
        .devices
        .playback_device()
        .and_then(|device| AudioPlayback::new(device, params.playback_config))
    {
        Ok(playback) => Some(Arc::new(playback)),
        Err(e) => {
            shared.device_error("playback", &e);
            None
        }
    };

    Ok(Connection {
        client,
        events,
        outbound,
        playback,
    })
}
