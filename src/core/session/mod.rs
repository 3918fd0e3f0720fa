//! Session orchestrator.
//!
//! [`LiveSession`] wires the backend, the protocol client, the audio
//! pipelines and the tool dispatcher together:
//!
//! 1. `prepare()` fetches the ephemeral token, the SDK tool catalog and the
//!    agent properties.
//! 2. `connect()` spends the token, opens the connection and starts a
//!    per-session event loop owning fresh client, capture and playback
//!    instances. The token is kept for a retry when the transport never
//!    opened.
//! 3. `disconnect()` stops capture, flushes playback, closes the transport
//!    and aborts in-flight tool calls.
//!
//! State is observed through watch channels: `connected()` and
//! `input_volume()`. Output volume is sampled with `volume()`.
//!
//! A close whose reason says the credential is spent is renewed silently:
//! a fresh token is fetched and the connection re-established while
//! `connected` stays true.

mod event_loop;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{
    AgentProperties, CredentialProvider, EphemeralToken, HealthProbe, HealthStatus,
    SessionBackend, ToolCatalogProvider,
};
use crate::config::EngineConfig;
use crate::core::audio::{AudioCapture, AudioDeviceProvider, AudioPlayback};
use crate::core::logs::LogStore;
use crate::core::realtime::gemini::is_prebuilt_voice;
use crate::core::realtime::{FunctionDeclaration, LiveConnectConfig, Transport};
use crate::core::tools::{LocalToolRegistry, PendingCalls, RemoteToolExecutor, ToolDispatcher};
use crate::errors::{
    ConfigError, ConnectionError, DeviceError, SessionResult, ToolExecutionError,
};

use event_loop::{ConnectParams, SessionLoop, connect_with_token};

/// How long `disconnect()` waits for the event loop before aborting it.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Identity of the running session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub model: String,
    /// Names of every declared tool, remote first.
    pub tools: Vec<String>,
}

#[derive(Default)]
struct Prepared {
    token: Option<EphemeralToken>,
    sdk_tools: Option<Vec<FunctionDeclaration>>,
    properties: Option<AgentProperties>,
}

/// State shared between the session handle and its event loop.
pub(crate) struct SessionShared {
    logs: LogStore,
    connected: watch::Sender<bool>,
    input_volume: watch::Sender<f32>,
    muted: watch::Sender<bool>,
    last_error: Mutex<Option<String>>,
    playback: Mutex<Option<Arc<AudioPlayback>>>,
}

impl SessionShared {
    fn set_connected(&self, connected: bool) {
        self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    fn set_last_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }

    fn set_playback(&self, playback: Option<Arc<AudioPlayback>>) {
        *self.playback.lock() = playback;
    }

    /// A device failure disables one pipeline; the session continues.
    fn device_error(&self, pipeline: &str, err: &DeviceError) {
        tracing::error!("{} device unavailable: {}", pipeline, err);
        self.logs.push("device.error", format!("{pipeline}: {err}"));
        self.set_last_error(format!("{pipeline} unavailable: {err}"));
    }
}

struct ActiveSession {
    info: SessionInfo,
    shutdown: CancellationToken,
    pending: PendingCalls,
    task: JoinHandle<()>,
}

/// Remote executor view of the session backend.
struct BackendExecutor(Arc<dyn SessionBackend>);

#[async_trait::async_trait]
impl RemoteToolExecutor for BackendExecutor {
    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolExecutionError> {
        self.0.call_tool(name, args).await
    }
}

pub struct LiveSession {
    config: EngineConfig,
    backend: Arc<dyn SessionBackend>,
    transport: Arc<dyn Transport>,
    devices: Arc<dyn AudioDeviceProvider>,
    local_tools: Arc<LocalToolRegistry>,
    shared: Arc<SessionShared>,
    prepared: Mutex<Prepared>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
}

impl LiveSession {
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn SessionBackend>,
        transport: Arc<dyn Transport>,
        devices: Arc<dyn AudioDeviceProvider>,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        let (input_volume, _) = watch::channel(0.0);
        let (muted, _) = watch::channel(false);

        Self {
            shared: Arc::new(SessionShared {
                logs: LogStore::new(config.max_logs),
                connected,
                input_volume,
                muted,
                last_error: Mutex::new(None),
                playback: Mutex::new(None),
            }),
            config,
            backend,
            transport,
            devices,
            local_tools: Arc::new(LocalToolRegistry::new()),
            prepared: Mutex::new(Prepared::default()),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Tools executed in this process, declared alongside the SDK catalog.
    pub fn with_local_tools(mut self, registry: LocalToolRegistry) -> Self {
        self.local_tools = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn logs(&self) -> LogStore {
        self.shared.logs.clone()
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.shared.connected.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Output level of the current playback. Never waits on the audio thread.
    pub fn volume(&self) -> f32 {
        self.shared
            .playback
            .lock()
            .as_ref()
            .map(|p| p.volume())
            .unwrap_or(0.0)
    }

    pub fn input_volume(&self) -> watch::Receiver<f32> {
        self.shared.input_volume.subscribe()
    }

    pub fn is_muted(&self) -> bool {
        *self.shared.muted.borrow()
    }

    /// Human-readable reason for the most recent failure or disconnect.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn has_token(&self) -> bool {
        self.prepared.lock().token.is_some()
    }

    /// Declarations sent in the setup message: the SDK catalog from
    /// `prepare()` followed by local tools.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut tools = self.prepared.lock().sdk_tools.clone().unwrap_or_default();
        tools.extend(self.local_tools.declarations());
        tools
    }

    /// Identity of the running session. `None` once its loop has ended,
    /// including after a surfaced close.
    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|a| !a.task.is_finished())
            .map(|a| a.info.clone())
    }

    pub async fn health_check(&self) -> SessionResult<HealthStatus> {
        Ok(self.backend.health_check().await?)
    }

    /// Fetch the ephemeral token, tool catalog and agent properties.
    ///
    /// Nothing is stored unless all three succeed.
    pub async fn prepare(&self) -> SessionResult<()> {
        let (token, sdk_tools, properties) = tokio::try_join!(
            async {
                self.backend
                    .ephemeral_token()
                    .await
                    .map_err(|e| ConfigError::Load(format!("ephemeral token: {e}")))
            },
            async {
                self.backend
                    .sdk_tools()
                    .await
                    .map_err(|e| ConfigError::Load(format!("tool catalog: {e}")))
            },
            async {
                self.backend
                    .agent_properties()
                    .await
                    .map_err(|e| ConfigError::Load(format!("agent properties: {e}")))
            },
        )
        .inspect_err(|e| {
            tracing::error!("Session prepare failed: {}", e);
            self.shared.set_last_error(e.to_string());
        })?;

        tracing::info!(
            "Session prepared: {} SDK tools, model {:?}",
            sdk_tools.len(),
            properties.model
        );
        let mut prepared = self.prepared.lock();
        prepared.token = Some(token);
        prepared.sdk_tools = Some(sdk_tools);
        prepared.properties = Some(properties);
        Ok(())
    }

    /// Connect with the prepared token. Tears down any running session first.
    pub async fn connect(&self) -> SessionResult<()> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            tracing::info!("Replacing running session {}", previous.info.id);
            stop_active(previous).await;
        }

        let (token, model, voice, sdk_tools) = self.take_connect_inputs()?;
        let mut declarations = sdk_tools.clone();
        declarations.extend(self.local_tools.declarations());

        let voice = voice.filter(|v| {
            let known = is_prebuilt_voice(v);
            if !known {
                tracing::warn!("Voice '{}' is not a prebuilt voice; using the server default", v);
            }
            known
        });

        let params = ConnectParams {
            backend: self.backend.clone(),
            transport: self.transport.clone(),
            devices: self.devices.clone(),
            model: model.clone(),
            live_config: LiveConnectConfig {
                base_url: self.config.live_api_url.clone(),
                voice,
                system_instruction: Some(self.config.system_instruction.clone()),
                tools: declarations.clone(),
                setup_timeout: self.config.setup_timeout(),
                ..Default::default()
            },
            playback_config: self.config.playback_config(),
            reconnection: self.config.reconnection.clone(),
        };

        *self.shared.last_error.lock() = None;
        let connection = match connect_with_token(&params, &self.shared, token.as_str()).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("Session connect failed: {}", e);
                if matches!(
                    e,
                    ConnectionError::Unreachable(_) | ConnectionError::InvalidConfig(_)
                ) {
                    // The upgrade never happened, so the credential is still unused.
                    let mut prepared = self.prepared.lock();
                    if prepared.token.is_none() {
                        prepared.token = Some(token);
                    }
                }
                self.shared.logs.push("session.error", e.to_string());
                self.shared.set_last_error(e.to_string());
                self.shared.set_connected(false);
                return Err(e.into());
            }
        };
        drop(token);

        let mut capture = match self.devices.capture_device() {
            Ok(device) => Some(AudioCapture::new(device, self.config.capture_config())),
            Err(e) => {
                self.shared.device_error("capture", &e);
                None
            }
        };
        if let Some(c) = capture.as_mut()
            && !self.is_muted()
            && let Err(e) = c.start()
        {
            self.shared.device_error("capture", &e);
        }

        let pending = PendingCalls::new();
        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::new(BackendExecutor(self.backend.clone())),
            &sdk_tools,
            self.local_tools.clone(),
            pending.clone(),
            self.shared.logs.clone(),
        ));

        let id = Uuid::new_v4();
        let info = SessionInfo {
            id,
            model,
            tools: declarations.into_iter().map(|d| d.name).collect(),
        };
        let shutdown = CancellationToken::new();

        self.shared.set_playback(connection.playback.clone());
        self.shared.set_connected(true);
        self.shared.logs.push("session.open", info.model.clone());
        tracing::info!(session_id = %id, "Session connected ({})", info.model);

        let task = tokio::spawn(
            SessionLoop {
                id,
                shared: self.shared.clone(),
                params,
                connection,
                capture,
                dispatcher,
                pending: pending.clone(),
                shutdown: shutdown.clone(),
            }
            .run(),
        );

        *active = Some(ActiveSession {
            info,
            shutdown,
            pending,
            task,
        });
        Ok(())
    }

    /// Check preconditions and take the token. Nothing is taken on error.
    /// `connect` puts the token back if the transport never opened.
    fn take_connect_inputs(
        &self,
    ) -> Result<(EphemeralToken, String, Option<String>, Vec<FunctionDeclaration>), ConfigError> {
        let mut prepared = self.prepared.lock();

        if prepared.token.is_none() {
            return Err(ConfigError::MissingCredential);
        }

        let properties = prepared.properties.clone().unwrap_or_default();
        let model = self
            .config
            .model_override
            .clone()
            .or(properties.model)
            .filter(|m| !m.trim().is_empty())
            .ok_or(ConfigError::MissingModel)?;
        let voice = self.config.voice_override.clone().or(properties.voice);

        let sdk_tools = prepared.sdk_tools.clone().unwrap_or_default();
        if sdk_tools.is_empty() && self.local_tools.is_empty() {
            return Err(ConfigError::MissingToolCatalog);
        }

        let token = prepared.token.take().ok_or(ConfigError::MissingCredential)?;
        Ok((token, model, voice, sdk_tools))
    }

    /// Stop the running session. Safe to call when nothing is running.
    pub async fn disconnect(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            tracing::info!(session_id = %active.info.id, "Disconnecting session");
            stop_active(active).await;
            self.shared.logs.push("session.disconnect", "");
        }
        self.shared.set_playback(None);
        self.shared.input_volume.send_replace(0.0);
        self.shared.set_connected(false);
    }

    /// Flip mute. Muting stops capture and keeps the connection open.
    /// Returns the new state.
    pub fn toggle_mute(&self) -> bool {
        let mut muted = false;
        self.shared.muted.send_modify(|m| {
            *m = !*m;
            muted = *m;
        });
        tracing::info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        muted
    }
}

async fn stop_active(mut active: ActiveSession) {
    active.shutdown.cancel();
    // Nothing still pending may be answered once disconnect starts.
    active.pending.clear();
    if tokio::time::timeout(TEARDOWN_TIMEOUT, &mut active.task)
        .await
        .is_err()
    {
        tracing::warn!(
            session_id = %active.info.id,
            "Session loop did not stop in time; aborting"
        );
        active.task.abort();
    }
}
