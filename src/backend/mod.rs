//! Backend wrapper interface.
//!
//! The session needs four things from the backend: an ephemeral credential,
//! the agent's model properties, the tool catalog and remote tool execution.
//! Each is a trait so tests can stand in for the HTTP service;
//! [`BackendClient`] implements all of them.
//!
//! | Endpoint | Method | Purpose |
//! |---|---|---|
//! | `/get-ephemeral-token` | GET | Single-use live session credential |
//! | `/get-sdk-tools` | GET | Remote tool declarations |
//! | `/get-ai-agent-properties` | GET | Model id and voice |
//! | `/health-check` | GET | Liveness |
//! | `/call-sdk-tool` | POST | Remote tool execution |

mod client;
mod types;

use async_trait::async_trait;

pub use client::BackendClient;
pub use types::{
    AgentProperties, BackendErrorBody, CallToolRequest, EphemeralToken, HealthState,
    HealthStatus,
};

use crate::core::realtime::FunctionDeclaration;
use crate::core::tools::RemoteToolExecutor;
use crate::errors::BackendResult;

/// Supplies the session credential and agent configuration.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn ephemeral_token(&self) -> BackendResult<EphemeralToken>;

    async fn agent_properties(&self) -> BackendResult<AgentProperties>;
}

/// Supplies the remote tool declarations.
#[async_trait]
pub trait ToolCatalogProvider: Send + Sync {
    async fn sdk_tools(&self) -> BackendResult<Vec<FunctionDeclaration>>;
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn health_check(&self) -> BackendResult<HealthStatus>;
}

/// Everything a session needs from the backend.
pub trait SessionBackend:
    CredentialProvider + ToolCatalogProvider + RemoteToolExecutor + HealthProbe
{
}

impl<T> SessionBackend for T where
    T: CredentialProvider + ToolCatalogProvider + RemoteToolExecutor + HealthProbe
{
}
