//! Tools the model can call.
//!
//! A [`Tool`] either executes directly ([`ToolHandler::Execute`]) or
//! spawns a process and forwards the call to it ([`ToolHandler::Process`]).
//! The [`ToolRegistry`] is keyed by exact tool name.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use loom_core::completion::ToolSpec;
use serde_json::Value;
use tracing::debug;

use crate::errors::{KernelError, ToolError};
use crate::process::Process;

/// A directly executed tool.
#[async_trait]
pub trait ExecuteTool: Send + Sync {
    /// Run with the call arguments.
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// Builds the process that will serve a call.
pub type ProcessFactory = Arc<dyn Fn() -> Arc<dyn Process> + Send + Sync>;

/// How a tool is served.
#[derive(Clone)]
pub enum ToolHandler {
    /// Await the tool and use its return value as the result.
    Execute(Arc<dyn ExecuteTool>),
    /// Spawn a process and route the call to it; the result arrives as a
    /// process `tool-result` event.
    Process(ProcessFactory),
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Execute(_) => "Execute",
            Self::Process(_) => "Process",
        })
    }
}

type ExecuteFn = dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync;

struct FnTool(Box<ExecuteFn>);

#[async_trait]
impl ExecuteTool for FnTool {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        (self.0)(args).await
    }
}

/// A named tool with its argument schema.
#[derive(Clone, Debug)]
pub struct Tool {
    /// Unique name; calls are matched against it exactly.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: Value,
    /// How calls are served.
    pub handler: ToolHandler,
}

impl Tool {
    /// Tool backed by an async closure.
    pub fn execute<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let run: Box<ExecuteFn> = Box::new(
            move |args: Value| -> BoxFuture<'static, Result<Value, ToolError>> { Box::pin(f(args)) },
        );
        Self::with_handler(
            name,
            description,
            parameters,
            ToolHandler::Execute(Arc::new(FnTool(run))),
        )
    }

    /// Tool that spawns a fresh process per call.
    pub fn process<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Arc<dyn Process> + Send + Sync + 'static,
    {
        Self::with_handler(
            name,
            description,
            parameters,
            ToolHandler::Process(Arc::new(factory)),
        )
    }

    /// Tool with an explicit handler.
    pub fn with_handler(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }

    /// `"execute"` or `"process"`, used as a metrics label.
    pub fn mode(&self) -> &'static str {
        match self.handler {
            ToolHandler::Execute(_) => "execute",
            ToolHandler::Process(_) => "process",
        }
    }

    /// Schema entry sent upstream.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Tools by name.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Names must be unique.
    pub fn register(&mut self, tool: Tool) -> Result<(), KernelError> {
        if self.tools.contains_key(&tool.name) {
            return Err(KernelError::DuplicateTool(tool.name));
        }
        debug!(tool_name = %tool.name, mode = tool.mode(), "tool registered");
        let _ = self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, tool: Tool) -> Result<Self, KernelError> {
        self.register(tool)?;
        Ok(self)
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Tool name → schema, in name order.
    pub fn specs(&self) -> BTreeMap<String, ToolSpec> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.spec()))
            .collect()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
