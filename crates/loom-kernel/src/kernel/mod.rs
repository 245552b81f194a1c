//! The session kernel.
//!
//! A [`Kernel`] owns the bounded history, the idle/busy state and the tool
//! dispatch loop of one conversation. [`Kernel::send`] appends a message,
//! streams a completion over the rendered history and dispatches every tool
//! call the model issues. When every call of a `tool-calls` group has a
//! result, the kernel appends one `tool-results` message and streams again,
//! until a stream ends with nothing left pending.
//!
//! Only the latest input survives: `send` while busy cancels the running
//! loop (aborting its stream) and runs once the kernel is idle again, unless
//! an even newer `send` arrived in the meantime. Tool work that was already
//! dispatched keeps running; its results are dropped.

pub mod history;
pub mod pending_calls;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use loom_core::completion::{CompletionError, CompletionRequest, CompletionService};
use loom_core::messages::{Message, StreamItem, ToolCall, ToolCallsMessage, ToolResult};
use loom_settings::LoomSettings;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub use history::MessageBuffer;
pub use pending_calls::{ExpiredCall, PendingCalls, Resolution};

use crate::errors::KernelError;
use crate::event_emitter::EventEmitter;
use crate::process::{Process, ProcessContainer, ProcessSnapshot};
use crate::runtime::{Runtime, RuntimeEvent};
use crate::stream::{StreamAssembler, StreamHandle, render_messages};
use crate::tools::{ToolHandler, ToolRegistry};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and public types
// ─────────────────────────────────────────────────────────────────────────────

/// Kernel construction options.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Maximum number of buffered messages.
    ///
    /// Values below 1 are raised to 1: the message being sent must stay
    /// buffered to be rendered.
    pub message_limit: usize,
    /// Capacity of the kernel and runtime event channels.
    pub event_capacity: usize,
    /// Deadline for a single tool call; `None` waits forever.
    pub tool_call_timeout: Option<Duration>,
    /// System instructions passed with every completion request.
    pub instructions: Option<String>,
    /// Initial history; only the last `message_limit` are kept.
    pub messages: Vec<Message>,
}

impl KernelConfig {
    /// Project the `kernel` section of `settings`.
    pub fn from_settings(settings: &LoomSettings) -> Self {
        let kernel = &settings.kernel;
        Self {
            message_limit: kernel.message_limit,
            event_capacity: kernel.event_capacity,
            tool_call_timeout: kernel.tool_call_timeout(),
            instructions: kernel.instructions.clone(),
            messages: Vec::new(),
        }
    }

    /// Seed the history.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::from_settings(&LoomSettings::default())
    }
}

/// Whether a send loop is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    /// Nothing running.
    Idle,
    /// A send loop is streaming or waiting on tool calls.
    Busy,
}

/// Caller-facing kernel events.
#[derive(Clone, Debug, PartialEq)]
pub enum KernelEvent {
    /// A message or delta, in emission order.
    Message(StreamItem),
    /// The kernel went from idle to busy.
    Busy,
    /// The kernel went from busy to idle.
    Idle,
}

impl KernelEvent {
    /// Event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Busy => "busy",
            Self::Idle => "idle",
        }
    }
}

/// How a [`Kernel::send`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The loop ran until a stream ended with no calls pending.
    Completed,
    /// A newer send (or [`Kernel::abort`]) cancelled the running loop.
    Cancelled,
    /// A newer send arrived before this one started; the message was dropped.
    Superseded,
}

// ─────────────────────────────────────────────────────────────────────────────
// Kernel
// ─────────────────────────────────────────────────────────────────────────────

struct Control {
    generation: u64,
    active: Option<CancellationToken>,
    status: KernelStatus,
}

/// Session orchestrator.
pub struct Kernel {
    service: Arc<dyn CompletionService>,
    tools: ToolRegistry,
    runtime: Arc<Runtime>,
    instructions: Option<String>,
    tool_call_timeout: Option<Duration>,
    history: Mutex<MessageBuffer>,
    control: Mutex<Control>,
    streams: Mutex<HashMap<String, StreamHandle>>,
    emitter: EventEmitter<KernelEvent>,
    run_lock: tokio::sync::Mutex<()>,
}

impl Kernel {
    /// Kernel with its own [`Runtime`].
    pub fn new(
        service: Arc<dyn CompletionService>,
        tools: ToolRegistry,
        config: KernelConfig,
    ) -> Self {
        let runtime = Runtime::with_capacity(config.event_capacity);
        Self::with_runtime(service, tools, runtime, config)
    }

    /// Kernel sharing an existing runtime.
    pub fn with_runtime(
        service: Arc<dyn CompletionService>,
        tools: ToolRegistry,
        runtime: Arc<Runtime>,
        config: KernelConfig,
    ) -> Self {
        if config.message_limit == 0 {
            warn!("message_limit of 0 raised to 1");
        }
        info!(
            message_limit = config.message_limit.max(1),
            tools = tools.len(),
            "kernel created"
        );
        Self {
            service,
            tools,
            runtime,
            instructions: config.instructions,
            tool_call_timeout: config.tool_call_timeout,
            history: Mutex::new(MessageBuffer::seeded(config.message_limit, config.messages)),
            control: Mutex::new(Control {
                generation: 0,
                active: None,
                status: KernelStatus::Idle,
            }),
            streams: Mutex::new(HashMap::new()),
            emitter: EventEmitter::with_capacity(config.event_capacity),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    // ── Sending ─────────────────────────────────────────────────────────

    /// Append `message` and run the completion/tool loop until idle.
    ///
    /// Stream failures and unknown tools end the loop with `Err`; the
    /// kernel is idle again either way.
    #[instrument(skip_all, fields(message_id = %message.id(), kind = message.kind()))]
    pub async fn send(&self, message: Message) -> Result<SendOutcome, KernelError> {
        counter!("kernel_sends_total").increment(1);
        let generation = self.interrupt();

        let _run = self.run_lock.lock().await;
        let Some(cancel) = self.claim(generation) else {
            debug!("superseded by newer input");
            return Ok(SendOutcome::Superseded);
        };
        let _busy = BusyGuard::enter(self);

        let outcome = self.drive(message, &cancel).await;
        match &outcome {
            Ok(outcome) => debug!(?outcome, "send finished"),
            Err(e) => warn!(error = %e, category = e.category(), "send failed"),
        }
        outcome
    }

    /// Cancel the running loop and any sends waiting behind it.
    pub fn abort(&self) {
        let _ = self.interrupt();
    }

    /// Abort, wait for idle, then kill every process.
    pub async fn shutdown(&self) {
        let _ = self.interrupt();
        let _run = self.run_lock.lock().await;
        self.runtime.killall().await;
        info!("kernel shut down");
    }

    fn interrupt(&self) -> u64 {
        let generation = {
            let mut control = self.control.lock();
            control.generation += 1;
            if let Some(active) = &control.active {
                active.cancel();
            }
            control.generation
        };
        for handle in self.streams.lock().values() {
            if !handle.is_aborted() {
                debug!(stream_id = handle.stream_id(), "aborting stream");
                handle.abort();
                counter!("kernel_streams_aborted_total").increment(1);
            }
        }
        generation
    }

    fn claim(&self, generation: u64) -> Option<CancellationToken> {
        let mut control = self.control.lock();
        if control.generation != generation {
            return None;
        }
        let token = CancellationToken::new();
        control.active = Some(token.clone());
        Some(token)
    }

    async fn drive(
        &self,
        first: Message,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome, KernelError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut process_events = self.runtime.subscribe();
        let mut pending = PendingCalls::new();
        let mut queue = VecDeque::from([first]);

        loop {
            if let Some(message) = queue.pop_front() {
                self.append(message);
                let request = self.request();
                let mut assembler = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(SendOutcome::Cancelled),
                    opened = StreamAssembler::open(self.service.as_ref(), request) => opened?,
                };
                let _tracked = TrackedStream::new(self, &assembler);

                loop {
                    let step = tokio::select! {
                        biased;
                        () = cancel.cancelled() => Step::Cancelled,
                        item = assembler.next() => Step::Stream(item),
                        wake = next_wake(&mut rx, &mut process_events, pending.next_deadline()) => {
                            Step::Wake(wake)
                        }
                    };
                    match step {
                        Step::Cancelled => {
                            assembler.abort();
                            return Ok(SendOutcome::Cancelled);
                        }
                        Step::Stream(None) if assembler.is_aborted() => {
                            return Ok(SendOutcome::Cancelled);
                        }
                        Step::Stream(None) => break,
                        Step::Stream(Some(Err(e))) => return Err(e.into()),
                        Step::Stream(Some(Ok(item))) => {
                            if cancel.is_cancelled() || assembler.is_aborted() {
                                return Ok(SendOutcome::Cancelled);
                            }
                            if let Some(calls) = self.fold(item) {
                                self.dispatch(&calls, &mut pending, &tx)?;
                            }
                        }
                        Step::Wake(wake) => self.on_wake(wake, &mut pending, &mut queue).await,
                    }
                }
                continue;
            }

            if pending.is_empty() {
                return Ok(SendOutcome::Completed);
            }
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Cancelled,
                wake = next_wake(&mut rx, &mut process_events, pending.next_deadline()) => {
                    Step::Wake(wake)
                }
            };
            match step {
                Step::Wake(wake) => self.on_wake(wake, &mut pending, &mut queue).await,
                Step::Cancelled | Step::Stream(_) => return Ok(SendOutcome::Cancelled),
            }
        }
    }

    // ── History ─────────────────────────────────────────────────────────

    fn append(&self, message: Message) {
        let evicted = self.history.lock().push(message.clone());
        log_evicted(&evicted);
        let _ = self.emitter.emit(KernelEvent::Message(message.into()));
    }

    fn fold(&self, item: StreamItem) -> Option<ToolCallsMessage> {
        let evicted = {
            let mut history = self.history.lock();
            match &item {
                StreamItem::Delta(delta) => history.apply_delta(delta),
                StreamItem::Message(message) => history.push(message.clone()),
            }
        };
        log_evicted(&evicted);
        let calls = match &item {
            StreamItem::Message(Message::ToolCalls(calls)) => Some(calls.clone()),
            _ => None,
        };
        let _ = self.emitter.emit(KernelEvent::Message(item));
        calls
    }

    fn request(&self) -> CompletionRequest {
        let messages = self.history.lock().to_vec();
        CompletionRequest {
            turns: render_messages(&messages),
            tools: self.tools.specs(),
            instructions: self.instructions.clone(),
        }
    }

    // ── Tool dispatch ───────────────────────────────────────────────────

    fn dispatch(
        &self,
        calls: &ToolCallsMessage,
        pending: &mut PendingCalls,
        tx: &mpsc::UnboundedSender<Dispatch>,
    ) -> Result<(), KernelError> {
        let mut resolved = Vec::with_capacity(calls.calls.len());
        for call in &calls.calls {
            let Some(tool) = self.tools.get(&call.name) else {
                error!(tool_name = %call.name, call_id = %call.id, "tool not found");
                return Err(KernelError::UnknownTool(call.name.clone()));
            };
            resolved.push((call, tool));
        }

        let deadline = self.tool_call_timeout.map(|timeout| Instant::now() + timeout);
        pending.open_group(calls, deadline);
        for (call, tool) in resolved {
            counter!("tool_calls_total", "tool" => call.name.clone(), "mode" => tool.mode())
                .increment(1);
            debug!(call_id = %call.id, tool_name = %call.name, mode = tool.mode(), "dispatching tool call");
            let task = tokio::spawn(run_tool(
                tool.handler.clone(),
                call.clone(),
                Arc::clone(&self.runtime),
                tx.clone(),
            ));
            pending.attach_task(&call.id, task.abort_handle());
        }
        Ok(())
    }

    async fn on_wake(
        &self,
        wake: Wake,
        pending: &mut PendingCalls,
        queue: &mut VecDeque<Message>,
    ) {
        match wake {
            Wake::Dispatch(Dispatch::Spawned { call_id, pid }) => {
                if !pending.attach_process(&call_id, pid.as_str()) {
                    debug!(%call_id, %pid, "process spawned for a settled call");
                }
            }
            Wake::Dispatch(Dispatch::Finished(result)) => settle(result, pending, queue),
            Wake::ProcessResult { pid, result } => {
                if pending.contains(&result.call_id) {
                    debug!(%pid, call_id = %result.call_id, "process delivered result");
                    settle(result, pending, queue);
                }
            }
            Wake::Deadline => self.expire(pending, queue).await,
        }
    }

    async fn expire(&self, pending: &mut PendingCalls, queue: &mut VecDeque<Message>) {
        let Some(timeout) = self.tool_call_timeout else {
            return;
        };
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        for expired in pending.expired(Instant::now()) {
            counter!("tool_call_timeouts_total").increment(1);
            warn!(
                call_id = %expired.call.id,
                tool_name = %expired.call.name,
                timeout_ms,
                "tool call timed out"
            );
            if let Some(task) = &expired.task {
                task.abort();
            }
            if let Some(pid) = &expired.pid {
                if let Err(e) = self.runtime.kill(pid).await {
                    debug!(%pid, error = %e, "timed-out process already gone");
                }
            }
            let result = ToolResult::failure(
                &expired.call,
                format!("tool call timed out after {timeout_ms}ms"),
            );
            settle(result, pending, queue);
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Buffered history, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.history.lock().to_vec()
    }

    /// Current status.
    pub fn status(&self) -> KernelStatus {
        self.control.lock().status
    }

    /// Subscribe to messages, deltas and status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.emitter.subscribe()
    }

    /// Subscribe to runtime process events.
    pub fn subscribe_processes(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.runtime.subscribe()
    }

    /// The process runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Registered tools.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Number of assemblers currently streaming.
    pub fn in_flight_streams(&self) -> usize {
        self.streams.lock().len()
    }

    // ── Processes ───────────────────────────────────────────────────────

    /// Spawn `process` in the runtime.
    pub async fn spawn_process(
        &self,
        process: Arc<dyn Process>,
    ) -> Result<Arc<ProcessContainer>, KernelError> {
        Ok(self.runtime.spawn(process).await?)
    }

    /// Call a live process, resuming it first if suspended.
    pub async fn call_process(&self, id: &str, call: &ToolCall) -> Result<ToolResult, KernelError> {
        Ok(self.runtime.call(id, call).await?)
    }

    /// Suspend a live process.
    pub async fn suspend_process(&self, id: &str) -> Result<(), KernelError> {
        Ok(self.runtime.suspend(id).await?)
    }

    /// Resume a live process.
    pub async fn resume_process(&self, id: &str) -> Result<(), KernelError> {
        Ok(self.runtime.resume(id).await?)
    }

    /// Kill a live process.
    pub async fn kill_process(&self, id: &str) -> Result<(), KernelError> {
        Ok(self.runtime.kill(id).await?)
    }

    /// Restore a process from its snapshot.
    pub async fn restore_process(
        &self,
        snapshot: ProcessSnapshot,
    ) -> Result<Arc<ProcessContainer>, KernelError> {
        Ok(self.runtime.restore(snapshot).await?)
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("status", &self.status())
            .field("messages", &self.history.lock().len())
            .field("tools", &self.tools.names())
            .field("processes", &self.runtime.len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop internals
// ─────────────────────────────────────────────────────────────────────────────

enum Step {
    Cancelled,
    Stream(Option<Result<StreamItem, CompletionError>>),
    Wake(Wake),
}

enum Dispatch {
    Spawned { call_id: String, pid: String },
    Finished(ToolResult),
}

enum Wake {
    Dispatch(Dispatch),
    ProcessResult { pid: String, result: ToolResult },
    Deadline,
}

async fn next_wake(
    rx: &mut mpsc::UnboundedReceiver<Dispatch>,
    events: &mut broadcast::Receiver<RuntimeEvent>,
    deadline: Option<Instant>,
) -> Wake {
    tokio::select! {
        biased;
        Some(dispatch) = rx.recv() => Wake::Dispatch(dispatch),
        (pid, result) = next_process_result(events) => Wake::ProcessResult { pid, result },
        () = sleep_until(deadline) => Wake::Deadline,
    }
}

async fn next_process_result(events: &mut broadcast::Receiver<RuntimeEvent>) -> (String, ToolResult) {
    loop {
        match events.recv().await {
            Ok(RuntimeEvent::ToolResult { pid, result }) => return (pid, result),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "process events lagged"),
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_tool(
    handler: ToolHandler,
    call: ToolCall,
    runtime: Arc<Runtime>,
    tx: mpsc::UnboundedSender<Dispatch>,
) {
    let work = async {
        match handler {
            ToolHandler::Execute(tool) => match tool.execute(call.args.clone()).await {
                Ok(output) => ToolResult::success(&call, output),
                Err(e) => ToolResult::failure(&call, e.to_string()),
            },
            ToolHandler::Process(factory) => match runtime.spawn(factory()).await {
                Ok(container) => {
                    let _ = tx.send(Dispatch::Spawned {
                        call_id: call.id.clone(),
                        pid: container.id().to_owned(),
                    });
                    match container.call(&call).await {
                        Ok(result) => result,
                        Err(e) => ToolResult::failure(&call, e.to_string()),
                    }
                }
                Err(e) => ToolResult::failure(&call, e.to_string()),
            },
        }
    };
    let result = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!(call_id = %call.id, tool_name = %call.name, "tool panicked");
            ToolResult::failure(&call, "tool panicked")
        }
    };
    if let Some(e) = &result.error {
        debug!(call_id = %call.id, tool_name = %call.name, error = %e, "tool call failed");
    }
    let _ = tx.send(Dispatch::Finished(result));
}

fn settle(result: ToolResult, pending: &mut PendingCalls, queue: &mut VecDeque<Message>) {
    if let Resolution::Complete(results) = pending.resolve(result) {
        debug!(results = results.len(), "tool-call group complete");
        queue.push_back(Message::tool_results(results));
    }
}

fn log_evicted(evicted: &[Message]) {
    if !evicted.is_empty() {
        debug!(evicted = evicted.len(), "history window full");
    }
}

struct BusyGuard<'a> {
    kernel: &'a Kernel,
}

impl<'a> BusyGuard<'a> {
    fn enter(kernel: &'a Kernel) -> Self {
        kernel.control.lock().status = KernelStatus::Busy;
        let _ = kernel.emitter.emit(KernelEvent::Busy);
        Self { kernel }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        {
            let mut control = self.kernel.control.lock();
            control.active = None;
            control.status = KernelStatus::Idle;
        }
        let _ = self.kernel.emitter.emit(KernelEvent::Idle);
    }
}

struct TrackedStream<'a> {
    kernel: &'a Kernel,
    id: String,
}

impl<'a> TrackedStream<'a> {
    fn new(kernel: &'a Kernel, assembler: &StreamAssembler) -> Self {
        let id = assembler.id().to_owned();
        let _ = kernel.streams.lock().insert(id.clone(), assembler.handle());
        debug!(stream_id = %id, "stream started");
        Self { kernel, id }
    }
}

impl Drop for TrackedStream<'_> {
    fn drop(&mut self) {
        let _ = self.kernel.streams.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use futures::stream;
    use loom_core::completion::{CompletionEvent, CompletionResult, CompletionStream};
    use serde_json::{Value, json};

    use super::*;
    use crate::errors::ToolError;
    use crate::tools::Tool;

    /// Replies with the same canned events on every request.
    struct Echo(Vec<CompletionEvent>);

    #[async_trait]
    impl CompletionService for Echo {
        async fn stream(&self, _request: CompletionRequest) -> CompletionResult<CompletionStream> {
            Ok(Box::pin(stream::iter(self.0.clone().into_iter().map(Ok))))
        }
    }

    fn kernel(events: Vec<CompletionEvent>, tools: ToolRegistry) -> Kernel {
        Kernel::new(Arc::new(Echo(events)), tools, KernelConfig::default())
    }

    fn hello() -> Vec<CompletionEvent> {
        vec![
            CompletionEvent::TextDelta {
                delta: "hello".into(),
            },
            CompletionEvent::Finish {
                finish_reason: "stop".into(),
            },
        ]
    }

    #[test]
    fn config_from_settings() {
        let mut settings = LoomSettings::default();
        settings.kernel.message_limit = 7;
        settings.kernel.tool_call_timeout_ms = 0;
        settings.kernel.instructions = Some("be brief".into());
        let config = KernelConfig::from_settings(&settings);
        assert_eq!(config.message_limit, 7);
        assert!(config.tool_call_timeout.is_none());
        assert_eq!(config.instructions.as_deref(), Some("be brief"));
    }

    #[test]
    fn seeded_history_is_bounded() {
        let config = KernelConfig {
            message_limit: 2,
            ..KernelConfig::default()
        }
        .with_messages((0..4).map(|i| Message::input(i.to_string())).collect());
        let kernel = Kernel::new(Arc::new(Echo(hello())), ToolRegistry::new(), config);
        assert_eq!(kernel.messages().len(), 2);
        assert_eq!(kernel.status(), KernelStatus::Idle);
    }

    #[test]
    fn zero_message_limit_keeps_latest_message() {
        let config = KernelConfig {
            message_limit: 0,
            ..KernelConfig::default()
        }
        .with_messages((0..3).map(|i| Message::input(i.to_string())).collect());
        let kernel = Kernel::new(Arc::new(Echo(hello())), ToolRegistry::new(), config);
        let history = kernel.messages();
        assert_eq!(history.len(), 1);
        assert_matches!(&history[0], Message::Input(m) if m.text.as_deref() == Some("2"));
    }

    #[tokio::test]
    async fn plain_reply_round_trip() {
        let kernel = kernel(hello(), ToolRegistry::new());
        let mut events = kernel.subscribe();

        let outcome = kernel.send(Message::input("hi")).await.unwrap();
        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(kernel.status(), KernelStatus::Idle);
        assert_eq!(kernel.in_flight_streams(), 0);

        let kinds: Vec<_> = kernel.messages().iter().map(Message::kind).collect();
        assert_eq!(kinds, vec!["input", "reply"]);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event.event_type());
        }
        assert_eq!(seen.first(), Some(&"busy"));
        assert_eq!(seen.last(), Some(&"idle"));
    }

    #[tokio::test]
    async fn unknown_tool_is_fatal() {
        let kernel = kernel(
            vec![CompletionEvent::ToolCall {
                tool_name: "missing".into(),
                args: json!({}),
            }],
            ToolRegistry::new(),
        );
        let err = kernel.send(Message::input("go")).await.unwrap_err();
        assert!(matches!(err, KernelError::UnknownTool(ref name) if name == "missing"));
        assert!(err.is_fatal());
        assert_eq!(kernel.status(), KernelStatus::Idle);
    }

    #[tokio::test]
    async fn stream_error_returns_to_idle() {
        let kernel = kernel(
            vec![CompletionEvent::Error {
                error: "overloaded".into(),
            }],
            ToolRegistry::new(),
        );
        let err = kernel.send(Message::input("hi")).await.unwrap_err();
        assert!(matches!(err, KernelError::Stream(_)));
        assert_eq!(kernel.status(), KernelStatus::Idle);
        // The input stays in history.
        assert_eq!(kernel.messages().len(), 1);
    }

    #[tokio::test]
    async fn tool_errors_become_results() {
        let tools = ToolRegistry::new()
            .with(Tool::execute("flaky", "", json!({}), |_| async {
                Err::<Value, _>(ToolError::Failed("offline".into()))
            }))
            .unwrap();
        // First stream calls the tool; the follow-up stream repeats the call,
        // so cap the loop by aborting once results are seen.
        let kernel = Arc::new(kernel(
            vec![CompletionEvent::ToolCall {
                tool_name: "flaky".into(),
                args: json!({}),
            }],
            tools,
        ));
        let mut events = kernel.subscribe();
        let runner = {
            let kernel = Arc::clone(&kernel);
            tokio::spawn(async move { kernel.send(Message::input("go")).await })
        };

        let results = loop {
            if let KernelEvent::Message(StreamItem::Message(Message::ToolResults(m))) =
                events.recv().await.unwrap()
            {
                break m;
            }
        };
        kernel.abort();
        assert_eq!(runner.await.unwrap().unwrap(), SendOutcome::Cancelled);
        assert_eq!(results.results[0].error.as_deref(), Some("offline"));
    }
}
