//! Lifecycle wrapper around a single process.
//!
//! The container is the addressable identity of a process: its id survives
//! suspend/resume cycles and restore. While running it holds exactly one live
//! [`Process`]; while suspended it holds none, and the cached snapshot state
//! is what the next instance is built from.
//!
//! Lifecycle operations (`resume`, `suspend`, `exit`) are serialized by an
//! async mutex. Calls are not, so a long-running call never blocks a
//! suspend or kill. A process that asks to exit mid-call is exited once its
//! in-flight calls have finished.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use loom_core::messages::{ToolCall, ToolResult};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    Process, ProcessConstructor, ProcessSignal, ProcessSnapshot, ProcessStatus, ResourceIcon,
};
use crate::errors::RuntimeError;

/// Events a container emits to its listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum ContainerEvent {
    /// Process state changed.
    Change,
    /// Process activated.
    Resume,
    /// Process deactivated and detached.
    Suspend,
    /// Container exited; terminal.
    Exit,
    /// A call on this container finished.
    ToolResult(ToolResult),
}

type Listener = Arc<dyn Fn(&ContainerEvent) + Send + Sync>;

struct Slot {
    status: ProcessStatus,
    exited: bool,
    live: Option<Arc<dyn Process>>,
    // Built but never activated (fresh spawn).
    staged: Option<Arc<dyn Process>>,
    state: Value,
    name: Option<String>,
    icons: Vec<ResourceIcon>,
}

impl Slot {
    fn absorb_metadata(&mut self, process: &dyn Process) {
        if let Some(name) = process.name() {
            self.name = Some(name);
        }
        let icons = process.icons();
        if !icons.is_empty() {
            self.icons = icons;
        }
    }
}

/// Owns one process and its snapshot.
pub struct ProcessContainer {
    id: String,
    process_type: Option<String>,
    constructor: Option<ProcessConstructor>,
    me: Weak<ProcessContainer>,
    slot: Mutex<Slot>,
    lifecycle: tokio::sync::Mutex<()>,
    listeners: Mutex<Vec<Listener>>,
    calls_in_flight: AtomicUsize,
    exit_requested: AtomicBool,
}

impl ProcessContainer {
    /// Wrap a freshly built process. The container starts suspended; the
    /// process is activated on the first [`resume`](Self::resume).
    ///
    /// `constructor` rebuilds the process on resume after a suspend.
    pub fn new(
        id: impl Into<String>,
        process: Arc<dyn Process>,
        constructor: Option<ProcessConstructor>,
    ) -> Arc<Self> {
        let mut slot = Slot {
            status: ProcessStatus::Suspended,
            exited: false,
            live: None,
            staged: None,
            state: process.serialize(),
            name: None,
            icons: Vec::new(),
        };
        slot.absorb_metadata(process.as_ref());
        let process_type = process.process_type().map(str::to_owned);
        slot.staged = Some(process);
        Self::build(id.into(), process_type, constructor, slot)
    }

    /// Suspended container for `snapshot`. No process is built until resume.
    pub fn from_snapshot(snapshot: ProcessSnapshot, constructor: ProcessConstructor) -> Arc<Self> {
        let slot = Slot {
            status: ProcessStatus::Suspended,
            exited: false,
            live: None,
            staged: None,
            state: snapshot.state,
            name: snapshot.name,
            icons: snapshot.icons,
        };
        Self::build(snapshot.id, snapshot.process_type, Some(constructor), slot)
    }

    fn build(
        id: String,
        process_type: Option<String>,
        constructor: Option<ProcessConstructor>,
        slot: Slot,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            process_type,
            constructor,
            me: me.clone(),
            slot: Mutex::new(slot),
            lifecycle: tokio::sync::Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            calls_in_flight: AtomicUsize::new(0),
            exit_requested: AtomicBool::new(false),
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Stable container id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Process type, if the process is restorable.
    pub fn process_type(&self) -> Option<&str> {
        self.process_type.as_deref()
    }

    /// Current status.
    pub fn status(&self) -> ProcessStatus {
        self.slot.lock().status
    }

    /// Whether [`exit`](Self::exit) has run.
    pub fn is_exited(&self) -> bool {
        self.slot.lock().exited
    }

    /// Display name of the live process, falling back to the snapshot.
    pub fn name(&self) -> Option<String> {
        self.live()
            .and_then(|p| p.name())
            .or_else(|| self.slot.lock().name.clone())
    }

    /// Title of the live process.
    pub fn title(&self) -> Option<String> {
        self.live().and_then(|p| p.title())
    }

    /// Icons of the live process, falling back to the snapshot.
    pub fn icons(&self) -> Vec<ResourceIcon> {
        let live = self.live().map(|p| p.icons()).unwrap_or_default();
        if live.is_empty() {
            self.slot.lock().icons.clone()
        } else {
            live
        }
    }

    /// Whether the attached (or staged) process accepts suspension.
    /// Containers without an instance are already suspended.
    pub fn suspendable(&self) -> bool {
        let slot = self.slot.lock();
        slot.live
            .as_ref()
            .or(slot.staged.as_ref())
            .is_none_or(|p| p.suspendable())
    }

    /// Register an event listener. Listeners run synchronously on the
    /// emitting task and must not block.
    pub fn subscribe(&self, listener: impl Fn(&ContainerEvent) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    fn live(&self) -> Option<Arc<dyn Process>> {
        self.slot.lock().live.clone()
    }

    fn emit(&self, event: &ContainerEvent) {
        let listeners = self.listeners.lock().clone();
        for listener in &listeners {
            listener(event);
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Attach (building if needed) and activate the process.
    ///
    /// No-op when already running.
    pub async fn resume(&self) -> Result<(), RuntimeError> {
        {
            let _lifecycle = self.lifecycle.lock().await;
            let (staged, state) = {
                let mut slot = self.slot.lock();
                if slot.exited {
                    return Err(RuntimeError::Exited(self.id.clone()));
                }
                if slot.live.is_some() {
                    return Ok(());
                }
                (slot.staged.take(), slot.state.clone())
            };

            let process = match staged {
                Some(process) => process,
                None => self.construct(state)?,
            };
            self.bind(&process);

            if let Err(e) = process.activate().await {
                process.handle().unbind();
                self.slot.lock().staged = Some(process);
                return Err(e.into());
            }

            {
                let mut slot = self.slot.lock();
                slot.absorb_metadata(process.as_ref());
                slot.live = Some(process);
                slot.status = ProcessStatus::Running;
            }
            debug!(pid = %self.id, "process resumed");
            self.emit(&ContainerEvent::Resume);
        }
        self.exit_if_requested().await;
        Ok(())
    }

    /// Deactivate, capture state and detach the process.
    pub async fn suspend(&self) -> Result<(), RuntimeError> {
        let _lifecycle = self.lifecycle.lock().await;
        let process = {
            let slot = self.slot.lock();
            if slot.exited {
                return Err(RuntimeError::Exited(self.id.clone()));
            }
            slot.live
                .clone()
                .ok_or_else(|| RuntimeError::NoProcessAttached(self.id.clone()))?
        };
        if !process.suspendable() {
            return Err(RuntimeError::NotSuspendable(self.id.clone()));
        }

        process.deactivate().await?;
        let state = process.serialize();
        process.handle().unbind();
        {
            let mut slot = self.slot.lock();
            slot.absorb_metadata(process.as_ref());
            slot.live = None;
            slot.state = state;
            slot.status = ProcessStatus::Suspended;
        }
        debug!(pid = %self.id, "process suspended");
        self.emit(&ContainerEvent::Suspend);
        Ok(())
    }

    /// Deactivate (if attached) and emit `Exit`. Terminal and idempotent.
    pub async fn exit(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let process = {
            let mut slot = self.slot.lock();
            if slot.exited {
                return;
            }
            slot.exited = true;
            slot.staged = None;
            slot.live.take()
        };

        if let Some(process) = process {
            if let Err(e) = process.deactivate().await {
                warn!(pid = %self.id, error = %e, "deactivate failed during exit");
            }
            let state = process.serialize();
            process.handle().unbind();
            let mut slot = self.slot.lock();
            slot.absorb_metadata(process.as_ref());
            slot.state = state;
            slot.status = ProcessStatus::Suspended;
        }
        debug!(pid = %self.id, "process exited");
        self.emit(&ContainerEvent::Exit);
    }

    /// Run `call` on the live process and emit the result.
    ///
    /// Process failures become an error [`ToolResult`]; only container
    /// misuse (not running, exited) is returned as `Err`.
    pub async fn call(&self, call: &ToolCall) -> Result<ToolResult, RuntimeError> {
        let process = {
            let slot = self.slot.lock();
            if slot.exited {
                return Err(RuntimeError::Exited(self.id.clone()));
            }
            slot.live
                .clone()
                .ok_or_else(|| RuntimeError::NotRunning(self.id.clone()))?
        };

        let in_flight = InFlight::enter(self);
        let result = match process.call(call).await {
            Ok(output) => ToolResult::success(call, output),
            Err(e) => {
                warn!(pid = %self.id, tool = %call.name, error = %e, "process call failed");
                ToolResult::failure(call, e.to_string())
            }
        };
        self.emit(&ContainerEvent::ToolResult(result.clone()));
        in_flight.leave();
        self.exit_if_requested().await;
        Ok(result)
    }

    // ── Projection ──────────────────────────────────────────────────────

    /// Snapshot of status, metadata and process state. Side-effect free.
    pub fn serialize(&self) -> ProcessSnapshot {
        let (live, mut snapshot) = {
            let slot = self.slot.lock();
            (
                slot.live.clone(),
                ProcessSnapshot {
                    id: self.id.clone(),
                    process_type: self.process_type.clone(),
                    status: slot.status,
                    name: slot.name.clone(),
                    icons: slot.icons.clone(),
                    state: slot.state.clone(),
                },
            )
        };
        if let Some(process) = live {
            snapshot.state = process.serialize();
            if let Some(name) = process.name() {
                snapshot.name = Some(name);
            }
            let icons = process.icons();
            if !icons.is_empty() {
                snapshot.icons = icons;
            }
        }
        snapshot
    }

    /// Model-facing description of the live process, or its cached state.
    pub fn describe(&self) -> Value {
        match self.live() {
            Some(process) => process.describe(),
            None => self.slot.lock().state.clone(),
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn construct(&self, state: Value) -> Result<Arc<dyn Process>, RuntimeError> {
        let constructor = self.constructor.as_ref().ok_or_else(|| {
            RuntimeError::UnregisteredProcessType(
                self.process_type
                    .clone()
                    .unwrap_or_else(|| "<untyped>".to_string()),
            )
        })?;
        Ok(constructor(state)?)
    }

    fn bind(&self, process: &Arc<dyn Process>) {
        let me = self.me.clone();
        process.handle().bind(Arc::new(move |signal| {
            if let Some(container) = me.upgrade() {
                container.on_signal(signal);
            }
        }));
    }

    fn on_signal(&self, signal: ProcessSignal) {
        match signal {
            ProcessSignal::Change => {
                if let Some(process) = self.live() {
                    self.slot.lock().absorb_metadata(process.as_ref());
                }
                self.emit(&ContainerEvent::Change);
            }
            ProcessSignal::Exit => {
                self.exit_requested.store(true, Ordering::SeqCst);
                if self.calls_in_flight.load(Ordering::SeqCst) == 0 {
                    self.spawn_exit();
                }
            }
        }
    }

    async fn exit_if_requested(&self) {
        if self.exit_requested.load(Ordering::SeqCst)
            && self.calls_in_flight.load(Ordering::SeqCst) == 0
        {
            self.exit().await;
        }
    }

    fn spawn_exit(&self) {
        let Some(container) = self.me.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let _ = rt.spawn(async move { container.exit().await });
            }
            Err(_) => warn!(pid = %self.id, "exit requested outside a tokio runtime"),
        }
    }
}

impl fmt::Debug for ProcessContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("ProcessContainer")
            .field("id", &self.id)
            .field("type", &self.process_type)
            .field("status", &slot.status)
            .field("exited", &slot.exited)
            .field("name", &slot.name)
            .finish_non_exhaustive()
    }
}

/// Counts a call as in flight. If the calling future is dropped before
/// [`leave`](Self::leave), a pending exit request is honoured from `Drop`.
struct InFlight<'a> {
    container: &'a ProcessContainer,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn enter(container: &'a ProcessContainer) -> Self {
        let _ = container.calls_in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            container,
            armed: true,
        }
    }

    fn leave(mut self) {
        self.armed = false;
        let _ = self
            .container
            .calls_in_flight
            .fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let before = self
            .container
            .calls_in_flight
            .fetch_sub(1, Ordering::SeqCst);
        if before == 1 && self.container.exit_requested.load(Ordering::SeqCst) {
            self.container.spawn_exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::errors::ProcessError;
    use crate::process::{ProcessHandle, ProcessState};

    struct Counter {
        state: ProcessState<u64>,
        activations: Arc<AtomicUsize>,
        suspendable: bool,
    }

    impl Counter {
        fn new(count: u64, activations: &Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self {
                state: ProcessState::new(count),
                activations: Arc::clone(activations),
                suspendable: true,
            })
        }

        fn constructor(activations: &Arc<AtomicUsize>) -> ProcessConstructor {
            let activations = Arc::clone(activations);
            Arc::new(move |state: Value| -> Result<Arc<dyn Process>, ProcessError> {
                let count = serde_json::from_value(state)?;
                Ok(Counter::new(count, &activations))
            })
        }
    }

    #[async_trait]
    impl Process for Counter {
        fn handle(&self) -> &ProcessHandle {
            self.state.handle()
        }

        fn process_type(&self) -> Option<&str> {
            Some("counter")
        }

        fn name(&self) -> Option<String> {
            Some(format!("Counter at {}", self.state.get()))
        }

        fn suspendable(&self) -> bool {
            self.suspendable
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
                "increment" => {
                    self.state.update(|n| *n += 1);
                    Ok(json!(self.state.get()))
                }
                other => Err(ProcessError::UnknownCall(other.to_string())),
            }
        }
    }

    fn recorder(container: &ProcessContainer) -> Arc<Mutex<Vec<ContainerEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        container.subscribe(move |e| sink.lock().push(e.clone()));
        events
    }

    fn counter_container(activations: &Arc<AtomicUsize>) -> Arc<ProcessContainer> {
        ProcessContainer::new(
            "proc_test",
            Counter::new(0, activations),
            Some(Counter::constructor(activations)),
        )
    }

    #[tokio::test]
    async fn new_container_is_suspended_until_resumed() {
        let activations = Arc::new(AtomicUsize::new(0));
        let container = counter_container(&activations);
        assert_eq!(container.status(), ProcessStatus::Suspended);
        assert_eq!(activations.load(Ordering::SeqCst), 0);

        let events = recorder(&container);
        container.resume().await.unwrap();
        assert_eq!(container.status(), ProcessStatus::Running);
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert_eq!(*events.lock(), vec![ContainerEvent::Resume]);

        // Second resume is a no-op.
        container.resume().await.unwrap();
        assert_eq!(activations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn call_emits_change_then_result() {
        let activations = Arc::new(AtomicUsize::new(0));
        let container = counter_container(&activations);
        container.resume().await.unwrap();
        let events = recorder(&container);

        let call = ToolCall::new("increment", json!({}));
        let result = container.call(&call).await.unwrap();
        assert_eq!(result.output, json!(1));
        assert_eq!(result.call_id, call.id);
        assert_eq!(
            *events.lock(),
            vec![ContainerEvent::Change, ContainerEvent::ToolResult(result)]
        );
        assert_eq!(container.name().as_deref(), Some("Counter at 1"));
    }

    #[tokio::test]
    async fn unknown_sub_call_becomes_error_result() {
        let activations = Arc::new(AtomicUsize::new(0));
        let container = counter_container(&activations);
        container.resume().await.unwrap();

        let result = container
            .call(&ToolCall::new("explode", json!({})))
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.error.unwrap().contains("explode"));
    }

    #[tokio::test]
    async fn suspend_captures_state_and_resume_rebuilds() {
        let activations = Arc::new(AtomicUsize::new(0));
        let container = counter_container(&activations);
        container.resume().await.unwrap();
        let _ = container
            .call(&ToolCall::new("increment", json!({})))
            .await
            .unwrap();

        container.suspend().await.unwrap();
        assert_eq!(container.status(), ProcessStatus::Suspended);
        assert_eq!(container.serialize().state, json!(1));
        assert_eq!(container.name().as_deref(), Some("Counter at 1"));

        container.resume().await.unwrap();
        assert_eq!(activations.load(Ordering::SeqCst), 2);
        let result = container
            .call(&ToolCall::new("increment", json!({})))
            .await
            .unwrap();
        assert_eq!(result.output, json!(2));
    }

    #[tokio::test]
    async fn suspend_without_process_fails() {
        let activations = Arc::new(AtomicUsize::new(0));
        let container = counter_container(&activations);
        assert_matches!(
            container.suspend().await,
            Err(RuntimeError::NoProcessAttached(_))
        );
    }

    #[tokio::test]
    async fn suspend_refused_for_non_suspendable() {
        let activations = Arc::new(AtomicUsize::new(0));
        let process = Arc::new(Counter {
            state: ProcessState::new(0),
            activations: Arc::clone(&activations),
            suspendable: false,
        });
        let container = ProcessContainer::new("p", process, None);
        container.resume().await.unwrap();
        assert!(!container.suspendable());
        assert_matches!(
            container.suspend().await,
            Err(RuntimeError::NotSuspendable(_))
        );
        assert_eq!(container.status(), ProcessStatus::Running);
    }

    #[tokio::test]
    async fn call_on_suspended_container_fails() {
        let activations = Arc::new(AtomicUsize::new(0));
        let container = counter_container(&activations);
        assert_matches!(
            container.call(&ToolCall::new("increment", json!({}))).await,
            Err(RuntimeError::NotRunning(_))
        );
    }

    #[tokio::test]
    async fn resume_without_constructor_after_suspend_fails() {
        let activations = Arc::new(AtomicUsize::new(0));
        let container = ProcessContainer::new("p", Counter::new(0, &activations), None);
        container.resume().await.unwrap();
        container.suspend().await.unwrap();
        assert_matches!(
            container.resume().await,
            Err(RuntimeError::UnregisteredProcessType(t)) if t == "counter"
        );
    }

    #[tokio::test]
    async fn exit_is_terminal_and_emitted_once() {
        let activations = Arc::new(AtomicUsize::new(0));
        let container = counter_container(&activations);
        container.resume().await.unwrap();
        let events = recorder(&container);

        container.exit().await;
        container.exit().await;
        assert!(container.is_exited());
        assert_eq!(*events.lock(), vec![ContainerEvent::Exit]);
        assert_matches!(container.resume().await, Err(RuntimeError::Exited(_)));
        assert_matches!(
            container.call(&ToolCall::new("increment", json!({}))).await,
            Err(RuntimeError::Exited(_))
        );
    }

    #[tokio::test]
    async fn serialize_is_idempotent() {
        let activations = Arc::new(AtomicUsize::new(0));
        let container = counter_container(&activations);
        container.resume().await.unwrap();
        let first = container.serialize();
        let second = container.serialize();
        assert_eq!(first, second);
        assert_eq!(first.id, "proc_test");
        assert_eq!(first.process_type.as_deref(), Some("counter"));
        assert_eq!(first.status, ProcessStatus::Running);
    }

    #[tokio::test]
    async fn from_snapshot_defers_construction() {
        let activations = Arc::new(AtomicUsize::new(0));
        let snapshot = ProcessSnapshot {
            id: "proc_saved".into(),
            process_type: Some("counter".into()),
            status: ProcessStatus::Suspended,
            name: Some("Saved".into()),
            icons: vec![],
            state: json!(5),
        };
        let container =
            ProcessContainer::from_snapshot(snapshot.clone(), Counter::constructor(&activations));
        assert_eq!(container.serialize(), snapshot);
        assert_eq!(activations.load(Ordering::SeqCst), 0);

        container.resume().await.unwrap();
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert_eq!(container.describe(), json!(5));
    }
}
