use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};

use super::{LocalToolRegistry, PendingCalls, RemoteToolExecutor};
use crate::core::logs::LogStore;
use crate::core::realtime::{FunctionDeclaration, OutboundHandle, ToolCallRequest, ToolCallResponse};
use crate::errors::ConnectionResult;

/// Response body sent in place of a failed tool's result.
pub const EXECUTION_FAILED: &str = "execution failed";

/// Where batched answers go. Implemented by the live client's outbound handle.
#[async_trait]
pub trait ToolResponseSink: Send + Sync {
    async fn send_tool_responses(&self, responses: Vec<ToolCallResponse>) -> ConnectionResult<()>;
}

#[async_trait]
impl ToolResponseSink for OutboundHandle {
    async fn send_tool_responses(&self, responses: Vec<ToolCallResponse>) -> ConnectionResult<()> {
        OutboundHandle::send_tool_responses(self, responses).await
    }
}

/// Resolves tool call batches for one session.
///
/// Remote tools take precedence over local tools of the same name. Calls
/// naming neither are dropped without an answer.
pub struct ToolDispatcher {
    remote: Arc<dyn RemoteToolExecutor>,
    remote_names: HashSet<String>,
    local: Arc<LocalToolRegistry>,
    pending: PendingCalls,
    logs: LogStore,
}

impl ToolDispatcher {
    pub fn new(
        remote: Arc<dyn RemoteToolExecutor>,
        remote_tools: &[FunctionDeclaration],
        local: Arc<LocalToolRegistry>,
        pending: PendingCalls,
        logs: LogStore,
    ) -> Self {
        Self {
            remote,
            remote_names: remote_tools.iter().map(|t| t.name.clone()).collect(),
            local,
            pending,
            logs,
        }
    }

    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.remote_names.contains(name) || self.local.contains(name)
    }

    /// Run every call of `batch` concurrently and keep the answers whose id
    /// is still pending. Each kept id is removed from the pending set.
    pub async fn resolve(&self, batch: Vec<ToolCallRequest>) -> Vec<ToolCallResponse> {
        let results = join_all(batch.into_iter().map(|call| async move {
            let id = call.id.clone();
            (id, self.resolve_one(call).await)
        }))
        .await;

        let mut responses = Vec::new();
        for (id, response) in results {
            // Claim even unanswered calls so they stop counting as pending.
            let still_pending = self.pending.claim(&id);
            match response {
                Some(response) if still_pending => responses.push(response),
                Some(response) => {
                    tracing::debug!(
                        "Discarding response for '{}' ({}): no longer pending",
                        response.name,
                        id
                    );
                }
                None => {}
            }
        }
        responses
    }

    /// Resolve `batch` and send its answers as one message. Returns the number
    /// of responses sent; nothing is sent when none remain.
    pub async fn dispatch(
        &self,
        batch: Vec<ToolCallRequest>,
        sink: &dyn ToolResponseSink,
    ) -> ConnectionResult<usize> {
        let responses = self.resolve(batch).await;
        if responses.is_empty() {
            return Ok(0);
        }
        let count = responses.len();
        sink.send_tool_responses(responses).await?;
        Ok(count)
    }

    async fn resolve_one(&self, call: ToolCallRequest) -> Option<ToolCallResponse> {
        let ToolCallRequest { id, name, args } = call;

        let result = if self.remote_names.contains(&name) {
            tracing::debug!("Calling remote tool '{}' ({})", name, id);
            self.remote.call_tool(&name, args).await.map(Some)
        } else if let Some(tool) = self.local.get(&name) {
            tracing::debug!("Calling local tool '{}' ({})", name, id);
            tool.call(args).await
        } else {
            tracing::warn!("Dropping call to unknown tool '{}' ({})", name, id);
            self.logs.push("tool.unknown", name);
            return None;
        };

        let response = match result {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::debug!("Local tool '{}' returned no value; leaving {} unanswered", name, id);
                return None;
            }
            Err(e) => {
                tracing::warn!("Tool execution failed: {}", e);
                self.logs.push("tool.error", e.to_string());
                error_body()
            }
        };

        Some(ToolCallResponse { id, name, response })
    }
}

fn error_body() -> Value {
    json!({ "error": EXECUTION_FAILED })
}
