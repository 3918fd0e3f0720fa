//! In-memory stand-in for the backend wrapper.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use live_assist::backend::{
    AgentProperties, CredentialProvider, EphemeralToken, HealthProbe, HealthState, HealthStatus,
    ToolCatalogProvider,
};
use live_assist::core::FunctionDeclaration;
use live_assist::core::tools::RemoteToolExecutor;
use live_assist::errors::{BackendError, BackendResult, ToolExecutionError};

#[derive(Clone)]
pub enum ToolBehavior {
    Return(Value),
    /// Return after the delay; `started` is notified when the call begins.
    Delay(Duration, Value),
    Fail { status: u16, message: String },
}

pub struct FakeBackend {
    pub tools: Mutex<Vec<FunctionDeclaration>>,
    pub properties: Mutex<AgentProperties>,
    behaviors: Mutex<HashMap<String, ToolBehavior>>,
    token_failures: Mutex<VecDeque<BackendError>>,
    pub tokens_issued: AtomicUsize,
    pub calls: Mutex<Vec<(String, Map<String, Value>)>>,
    pub call_started: Arc<Notify>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            tools: Mutex::new(vec![search_products_declaration()]),
            properties: Mutex::new(AgentProperties {
                model: Some("gemini-live-2.5-flash-preview".to_string()),
                voice: Some("Puck".to_string()),
            }),
            behaviors: Mutex::new(HashMap::new()),
            token_failures: Mutex::new(VecDeque::new()),
            tokens_issued: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            call_started: Arc::new(Notify::new()),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_tool(&self, name: &str, behavior: ToolBehavior) {
        self.behaviors.lock().insert(name.to_string(), behavior);
    }

    /// The next `ephemeral_token` calls fail with these errors, in order.
    pub fn fail_tokens(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.token_failures.lock().extend(errors);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

pub fn search_products_declaration() -> FunctionDeclaration {
    FunctionDeclaration::new("search_products", "Search the product catalog").with_parameters(
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        }),
    )
}

#[async_trait]
impl CredentialProvider for FakeBackend {
    async fn ephemeral_token(&self) -> BackendResult<EphemeralToken> {
        if let Some(err) = self.token_failures.lock().pop_front() {
            return Err(err);
        }
        let n = self.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(EphemeralToken::new(format!("auth_tokens/test-{n}")))
    }

    async fn agent_properties(&self) -> BackendResult<AgentProperties> {
        Ok(self.properties.lock().clone())
    }
}

#[async_trait]
impl ToolCatalogProvider for FakeBackend {
    async fn sdk_tools(&self) -> BackendResult<Vec<FunctionDeclaration>> {
        Ok(self.tools.lock().clone())
    }
}

#[async_trait]
impl HealthProbe for FakeBackend {
    async fn health_check(&self) -> BackendResult<HealthStatus> {
        Ok(HealthStatus {
            status: HealthState::Healthy,
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
            uptime: Some(1.0),
            version: Some("test".to_string()),
            error: None,
        })
    }
}

#[async_trait]
impl RemoteToolExecutor for FakeBackend {
    async fn call_tool(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Value, ToolExecutionError> {
        self.calls.lock().push((name.to_string(), args));
        self.call_started.notify_one();

        let behavior = self.behaviors.lock().get(name).cloned();
        match behavior {
            Some(ToolBehavior::Return(value)) => Ok(value),
            Some(ToolBehavior::Delay(delay, value)) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Some(ToolBehavior::Fail { status, message }) => Err(ToolExecutionError::Remote {
                tool: name.to_string(),
                status,
                message,
            }),
            None => Err(ToolExecutionError::Remote {
                tool: name.to_string(),
                status: 404,
                message: format!("Tool {name} not found"),
            }),
        }
    }
}
