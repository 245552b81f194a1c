//! Shared fixtures for kernel integration tests.

#![allow(dead_code, missing_docs)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use loom_core::completion::{
    CompletionEvent, CompletionRequest, CompletionResult, CompletionService, CompletionStream,
};
use loom_core::messages::ToolCall;
use loom_kernel::process::{ProcessConstructor, ResourceIcon};
use loom_kernel::{Process, ProcessError, ProcessHandle, ProcessState, Tool, ToolError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast};

// ─────────────────────────────────────────────────────────────────────────────
// Scripted completion service
// ─────────────────────────────────────────────────────────────────────────────

/// One step of a scripted stream.
pub enum Step {
    Event(CompletionEvent),
    /// Block until the notify fires (or the stream is dropped).
    Gate(Arc<Notify>),
}

pub fn text(delta: &str) -> Step {
    Step::Event(CompletionEvent::TextDelta {
        delta: delta.into(),
    })
}

pub fn call(tool_name: &str, args: Value) -> Step {
    Step::Event(CompletionEvent::ToolCall {
        tool_name: tool_name.into(),
        args,
    })
}

pub fn finish() -> Step {
    Step::Event(CompletionEvent::Finish {
        finish_reason: "stop".into(),
    })
}

pub fn fail(error: &str) -> Step {
    Step::Event(CompletionEvent::Error {
        error: error.into(),
    })
}

pub fn reply(content: &str) -> Vec<Step> {
    vec![text(content), finish()]
}

/// Plays one script per request, in order; replies "done" once exhausted.
#[derive(Default)]
pub struct ScriptedService {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedService {
    pub fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn stream(&self, request: CompletionRequest) -> CompletionResult<CompletionStream> {
        self.requests.lock().push(request);
        let steps = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| reply("done"));
        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    Step::Event(event) => yield Ok(event),
                    Step::Gate(gate) => gate.notified().await,
                }
            }
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────────────────────────────────────

pub fn weather_tool() -> Tool {
    Tool::execute(
        "get_weather",
        "Current weather for a city",
        json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        |_args| async { Ok::<_, ToolError>(json!("Mild & sunny.")) },
    )
}

/// Execute tool that sleeps for `delay` before answering with its name.
pub fn delayed_tool(name: &'static str, delay: Duration) -> Tool {
    Tool::execute(name, "", json!({}), move |_args| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, ToolError>(json!(name))
    })
}

/// Execute tool that never answers.
pub fn hanging_tool() -> Tool {
    Tool::execute("hang", "", json!({}), |_args| async {
        std::future::pending::<()>().await;
        Ok::<_, ToolError>(Value::Null)
    })
}

/// Process tool opening a [`Notebook`].
pub fn notebook_tool(activations: Arc<AtomicUsize>) -> Tool {
    Tool::process("open_notebook", "Open a notebook", json!({}), move || {
        Arc::new(Notebook::new(NotebookState::default(), Arc::clone(&activations)))
    })
}

/// Process tool whose process never answers.
pub fn stalled_tool() -> Tool {
    Tool::process("stall", "", json!({}), || Arc::new(Stalled::default()))
}

/// Process tool whose process never finishes activating.
pub fn slow_start_tool() -> Tool {
    Tool::process("slow_start", "", json!({}), || Arc::new(SlowStart::default()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Processes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookState {
    pub title: Option<String>,
    pub notes: Vec<String>,
}

/// Suspendable process that counts its activations.
pub struct Notebook {
    state: ProcessState<NotebookState>,
    activations: Arc<AtomicUsize>,
}

impl Notebook {
    pub const TYPE: &'static str = "notebook";

    pub fn new(state: NotebookState, activations: Arc<AtomicUsize>) -> Self {
        Self {
            state: ProcessState::new(state),
            activations,
        }
    }

    pub fn constructor(activations: Arc<AtomicUsize>) -> ProcessConstructor {
        Arc::new(move |state: Value| -> Result<Arc<dyn Process>, ProcessError> {
            let state: NotebookState = serde_json::from_value(state)?;
            Ok(Arc::new(Notebook::new(state, Arc::clone(&activations))))
        })
    }
}

#[async_trait]
impl Process for Notebook {
    fn handle(&self) -> &ProcessHandle {
        self.state.handle()
    }

    fn process_type(&self) -> Option<&str> {
        Some(Self::TYPE)
    }

    fn name(&self) -> Option<String> {
        Some(
            self.state
                .get()
                .title
                .unwrap_or_else(|| "Notebook".to_owned()),
        )
    }

    fn icons(&self) -> Vec<ResourceIcon> {
        vec![ResourceIcon {
            src: "notebook.svg".into(),
            mime_type: Some("image/svg+xml".into()),
        }]
    }

    async fn activate(&self) -> Result<(), ProcessError> {
        let _ = self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn serialize(&self) -> Value {
        self.state.to_value()
    }

    async fn call(&self, call: &ToolCall) -> Result<Value, ProcessError> {
        match call.name.as_str() {
            "open_notebook" => {
                let title = call.args["title"].as_str().map(str::to_owned);
                self.state.update(|s| s.title = title);
                Ok(json!({"opened": true}))
            }
            "add_note" => {
                let text = call.args["text"]
                    .as_str()
                    .ok_or_else(|| ProcessError::Failed("text is required".into()))?
                    .to_owned();
                let mut count = 0;
                self.state.update(|s| {
                    s.notes.push(text);
                    count = s.notes.len();
                });
                Ok(json!(count))
            }
            "list" => Ok(json!(self.state.get().notes)),
            other => Err(ProcessError::UnknownCall(other.to_owned())),
        }
    }
}

/// Non-suspendable process whose calls never finish.
#[derive(Default)]
pub struct Stalled {
    handle: ProcessHandle,
}

#[async_trait]
impl Process for Stalled {
    fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    fn suspendable(&self) -> bool {
        false
    }

    async fn call(&self, _call: &ToolCall) -> Result<Value, ProcessError> {
        std::future::pending().await
    }
}

/// Process stuck in `activate`.
#[derive(Default)]
pub struct SlowStart {
    handle: ProcessHandle,
}

#[async_trait]
impl Process for SlowStart {
    fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    async fn activate(&self) -> Result<(), ProcessError> {
        std::future::pending().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Drain everything currently buffered on `rx`.
pub fn drain<E: Clone>(rx: &mut broadcast::Receiver<E>) -> Vec<E> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
