//! HTTP client for the backend wrapper.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use url::Url;

use super::types::{
    AgentProperties, BackendErrorBody, CallToolRequest, EphemeralToken, HealthStatus,
};
use super::{CredentialProvider, HealthProbe, ToolCatalogProvider};
use crate::config::EngineConfig;
use crate::core::realtime::FunctionDeclaration;
use crate::core::tools::RemoteToolExecutor;
use crate::errors::{BackendError, BackendResult, ToolExecutionError};
use crate::utils::{unwrap_stringified_json, validate_backend_url};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the backend wrapper endpoints.
///
/// The context map is sent as query parameters on every call. One client is
/// shared by reference counting; it holds no per-session state.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: Url,
    context: BTreeMap<String, String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str) -> BackendResult<Self> {
        let mut base_url =
            validate_backend_url(base_url).map_err(|e| BackendError::InvalidUrl(e.to_string()))?;
        // Url::join replaces the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            context: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            client: reqwest::Client::new(),
        })
    }

    pub fn from_config(config: &EngineConfig) -> BackendResult<Self> {
        Ok(Self::new(&config.backend_url)?
            .with_context(config.context.clone())
            .with_timeout(config.request_timeout()))
    }

    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    fn request(&self, method: Method, endpoint: &str) -> BackendResult<RequestBuilder> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| BackendError::InvalidUrl(e.to_string()))?;

        tracing::debug!(url = %url, method = %method, "Backend request");

        Ok(self
            .client
            .request(method, url)
            .timeout(self.timeout)
            .header("Content-Type", "application/json")
            .query(&self.context))
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let body: BackendErrorBody = serde_json::from_str(&raw).unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: body.summary(&raw),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> BackendResult<T> {
        let response = self.send(self.request(Method::GET, endpoint)?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(format!("{endpoint}: {e}")))
    }

    /// `GET /get-ephemeral-token`
    pub async fn get_ephemeral_token(&self) -> BackendResult<EphemeralToken> {
        let token: EphemeralToken = self.get_json("get-ephemeral-token").await?;
        if token.is_empty() {
            return Err(BackendError::Decode(
                "get-ephemeral-token: empty token".to_string(),
            ));
        }
        tracing::info!("Fetched ephemeral token");
        Ok(token)
    }

    /// `GET /get-sdk-tools`
    pub async fn get_sdk_tools(&self) -> BackendResult<Vec<FunctionDeclaration>> {
        let tools: Vec<FunctionDeclaration> = self.get_json("get-sdk-tools").await?;
        tracing::info!("Fetched {} SDK tool declarations", tools.len());
        Ok(tools)
    }

    /// `GET /get-ai-agent-properties`
    pub async fn get_agent_properties(&self) -> BackendResult<AgentProperties> {
        self.get_json("get-ai-agent-properties").await
    }

    /// `GET /health-check`. An unhealthy backend answers with a non-2xx
    /// status and a body that still parses as [`HealthStatus`].
    pub async fn health_check(&self) -> BackendResult<HealthStatus> {
        let response = self
            .request(Method::GET, "health-check")?
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        match serde_json::from_str::<HealthStatus>(&raw) {
            Ok(health) => Ok(health),
            Err(_) if !status.is_success() => Err(BackendError::Status {
                status: status.as_u16(),
                body: raw,
            }),
            Err(e) => Err(BackendError::Decode(format!("health-check: {e}"))),
        }
    }

    /// `POST /call-sdk-tool`. A result that is JSON encoded inside a string
    /// is unwrapped to the inner value.
    pub async fn call_sdk_tool(&self, name: &str, args: &Map<String, Value>) -> BackendResult<Value> {
        let body = CallToolRequest {
            tool_name: name,
            tool_arguments: args,
        };
        let response = self
            .send(self.request(Method::POST, "call-sdk-tool")?.json(&body))
            .await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(format!("call-sdk-tool: {e}")))?;
        Ok(unwrap_stringified_json(value))
    }
}

#[async_trait]
impl CredentialProvider for BackendClient {
    async fn ephemeral_token(&self) -> BackendResult<EphemeralToken> {
        self.get_ephemeral_token().await
    }

    async fn agent_properties(&self) -> BackendResult<AgentProperties> {
        self.get_agent_properties().await
    }
}

#[async_trait]
impl ToolCatalogProvider for BackendClient {
    async fn sdk_tools(&self) -> BackendResult<Vec<FunctionDeclaration>> {
        self.get_sdk_tools().await
    }
}

#[async_trait]
impl HealthProbe for BackendClient {
    async fn health_check(&self) -> BackendResult<HealthStatus> {
        BackendClient::health_check(self).await
    }
}

#[async_trait]
impl RemoteToolExecutor for BackendClient {
    async fn call_tool(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Value, ToolExecutionError> {
        self.call_sdk_tool(name, &args).await.map_err(|e| match e {
            BackendError::Status { status, body } => ToolExecutionError::Remote {
                tool: name.to_string(),
                status,
                message: body,
            },
            other => ToolExecutionError::Transport {
                tool: name.to_string(),
                message: other.to_string(),
            },
        })
    }
}
