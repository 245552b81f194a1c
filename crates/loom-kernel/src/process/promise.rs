//! One-shot process wrapping an async closure.
//!
//! Useful for tools whose work should show up in the process table while it
//! runs. Not suspendable; it exits by itself after its first call.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use loom_core::messages::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Process, ProcessHandle, ProcessState};
use crate::errors::ProcessError;

type Job = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ProcessError>> + Send + Sync>;

/// Progress of a [`PromiseProcess`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PromiseState {
    /// Not finished yet.
    #[default]
    Pending,
    /// Finished with `output`.
    Completed {
        /// Job output.
        output: Value,
    },
    /// Finished with an error.
    Failed {
        /// Error description.
        error: String,
    },
}

/// Non-suspendable process that runs a closure once per call, then exits.
pub struct PromiseProcess {
    name: String,
    job: Job,
    state: ProcessState<PromiseState>,
}

impl PromiseProcess {
    /// Wrap `job`, which receives the call arguments.
    pub fn new<F, Fut>(name: impl Into<String>, job: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProcessError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            job: Arc::new(
                move |args: Value| -> BoxFuture<'static, Result<Value, ProcessError>> {
                    Box::pin(job(args))
                },
            ),
            state: ProcessState::new(PromiseState::Pending),
        }
    }

    /// Current progress.
    pub fn progress(&self) -> PromiseState {
        self.state.get()
    }
}

impl fmt::Debug for PromiseProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseProcess")
            .field("name", &self.name)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Process for PromiseProcess {
    fn handle(&self) -> &ProcessHandle {
        self.state.handle()
    }

    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    fn suspendable(&self) -> bool {
        false
    }

    fn serialize(&self) -> Value {
        self.state.to_value()
    }

    fn describe(&self) -> Value {
        match self.state.get() {
            PromiseState::Pending => json!("Working..."),
            PromiseState::Completed { .. } => json!("Complete."),
            PromiseState::Failed { error } => json!(format!("Failed: {error}")),
        }
    }

    async fn call(&self, call: &ToolCall) -> Result<Value, ProcessError> {
        let outcome = (self.job)(call.args.clone()).await;
        match &outcome {
            Ok(output) => self.state.set(PromiseState::Completed {
                output: output.clone(),
            }),
            Err(e) => self.state.set(PromiseState::Failed {
                error: e.to_string(),
            }),
        }
        self.handle().exit();
        outcome
    }
}
