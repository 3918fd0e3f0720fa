use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::realtime::FunctionDeclaration;
use crate::errors::ToolExecutionError;

/// A tool that runs inside the client process.
#[async_trait]
pub trait LocalTool: Send + Sync {
    fn declaration(&self) -> FunctionDeclaration;

    /// `Ok(None)` leaves the call unanswered.
    async fn call(&self, args: Map<String, Value>) -> Result<Option<Value>, ToolExecutionError>;
}

/// Adapts an async closure into a [`LocalTool`].
pub struct FnLocalTool<F> {
    declaration: FunctionDeclaration,
    handler: F,
}

impl<F, Fut> FnLocalTool<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>, String>> + Send,
{
    pub fn new(declaration: FunctionDeclaration, handler: F) -> Self {
        Self {
            declaration,
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> LocalTool for FnLocalTool<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>, String>> + Send,
{
    fn declaration(&self) -> FunctionDeclaration {
        self.declaration.clone()
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Option<Value>, ToolExecutionError> {
        (self.handler)(args)
            .await
            .map_err(|message| ToolExecutionError::Local {
                tool: self.declaration.name.clone(),
                message,
            })
    }
}

/// Local tools by name. Registering a name twice replaces the first tool.
#[derive(Default, Clone)]
pub struct LocalToolRegistry {
    tools: HashMap<String, Arc<dyn LocalTool>>,
}

impl LocalToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn LocalTool>) {
        let name = tool.declaration().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Local tool '{}' registered twice; keeping the latest", name);
        }
    }

    pub fn register_fn<F, Fut>(&mut self, declaration: FunctionDeclaration, handler: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, String>> + Send + 'static,
    {
        self.register(Arc::new(FnLocalTool::new(declaration, handler)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LocalTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Declarations sorted by name.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut declarations: Vec<_> = self.tools.values().map(|t| t.declaration()).collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for LocalToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("LocalToolRegistry")
            .field("tools", &names)
            .finish()
    }
}
