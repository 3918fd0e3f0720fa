//! Tool invocation.
//!
//! Tool calls from the model resolve against two executors:
//!
//! - remote tools, declared by the backend catalog and run through a
//!   [`RemoteToolExecutor`];
//! - local tools, registered in-process in a [`LocalToolRegistry`].
//!
//! The [`ToolDispatcher`] runs one inbound batch concurrently and returns its
//! answers as a single message. [`PendingCalls`] is the set of call ids still
//! allowed to receive an answer; the session prunes it on cancellation.

mod dispatcher;
mod local;
mod pending;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use dispatcher::{EXECUTION_FAILED, ToolDispatcher, ToolResponseSink};
pub use local::{FnLocalTool, LocalTool, LocalToolRegistry};
pub use pending::PendingCalls;

use crate::errors::ToolExecutionError;

/// Executes catalog tools outside the client process.
#[async_trait]
pub trait RemoteToolExecutor: Send + Sync {
    async fn call_tool(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Value, ToolExecutionError>;
}
