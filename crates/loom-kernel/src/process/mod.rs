//! Processes: stateful, suspendable units of long-running work.
//!
//! A [`Process`] is owned by exactly one [`ProcessContainer`], which drives
//! its lifecycle (`activate` on resume, `deactivate` on suspend and exit)
//! and exposes a stable id. Processes talk back to their container only
//! through their [`ProcessHandle`]: [`ProcessHandle::notify_change`] and
//! [`ProcessHandle::exit`]. [`ProcessState`] bundles a value with a handle
//! so every `set` emits a change.
//!
//! Restorable processes implement [`RestorableProcess`] and are registered
//! with the runtime by type name.

pub mod container;
pub mod promise;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use loom_core::messages::ToolCall;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProcessError;

pub use container::{ContainerEvent, ProcessContainer};
pub use promise::PromiseProcess;

/// Builds a process from persisted state. Used by restore and by resume
/// after a suspend.
pub type ProcessConstructor =
    Arc<dyn Fn(Value) -> Result<Arc<dyn Process>, ProcessError> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot types
// ─────────────────────────────────────────────────────────────────────────────

/// Container status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// A live process is attached and active.
    Running,
    /// No live process; state lives in the snapshot.
    Suspended,
}

/// Cosmetic icon attached to a process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIcon {
    /// Icon URI.
    pub src: String,
    /// MIME type of the icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Persistable projection of a container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Container id, stable across suspend and restore.
    pub id: String,
    /// Registered process type; untyped processes cannot be restored.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub process_type: Option<String>,
    /// Status at serialization time.
    pub status: ProcessStatus,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Icons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icons: Vec<ResourceIcon>,
    /// Opaque process state.
    #[serde(default)]
    pub state: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Signal a process sends to its container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessSignal {
    /// State changed.
    Change,
    /// The process asked to exit.
    Exit,
}

type SignalListener = Arc<dyn Fn(ProcessSignal) + Send + Sync>;

/// Back-channel from a process to the container that owns it.
///
/// Signals sent while no container is bound are dropped.
#[derive(Clone, Default)]
pub struct ProcessHandle {
    listener: Arc<Mutex<Option<SignalListener>>>,
}

impl ProcessHandle {
    /// Unbound handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tell the container the process state changed.
    pub fn notify_change(&self) {
        self.signal(ProcessSignal::Change);
    }

    /// Ask the container to exit once the current step completes.
    pub fn exit(&self) {
        self.signal(ProcessSignal::Exit);
    }

    /// Whether a container is listening.
    pub fn is_bound(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub(crate) fn bind(&self, listener: SignalListener) {
        *self.listener.lock() = Some(listener);
    }

    pub(crate) fn unbind(&self) {
        *self.listener.lock() = None;
    }

    fn signal(&self, signal: ProcessSignal) {
        // Clone out so the listener runs without the lock held.
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(signal);
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Process state cell; every mutation notifies the container.
#[derive(Debug)]
pub struct ProcessState<T> {
    value: Mutex<T>,
    handle: ProcessHandle,
}

impl<T: Clone + Serialize> ProcessState<T> {
    /// Wrap an initial value with a fresh handle.
    pub fn new(initial: T) -> Self {
        Self {
            value: Mutex::new(initial),
            handle: ProcessHandle::new(),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Replace the value and emit a change.
    pub fn set(&self, value: T) {
        *self.value.lock() = value;
        self.handle.notify_change();
    }

    /// Mutate in place and emit a change.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        {
            let mut guard = self.value.lock();
            f(&mut guard);
        }
        self.handle.notify_change();
    }

    /// Handle shared with the owning process.
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// JSON form of the current value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&*self.value.lock()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "process state is not serializable");
            Value::Null
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process trait
// ─────────────────────────────────────────────────────────────────────────────

/// A stateful unit of long-running work.
///
/// Implementations use interior mutability; the container may call
/// lifecycle methods and `call` from different tasks.
#[async_trait]
pub trait Process: Send + Sync + 'static {
    /// Back-channel to the owning container.
    fn handle(&self) -> &ProcessHandle;

    /// Type name used for restore dispatch. `None` for processes that
    /// cannot be restored.
    fn process_type(&self) -> Option<&str> {
        None
    }

    /// Display name.
    fn name(&self) -> Option<String> {
        None
    }

    /// Optional longer title.
    fn title(&self) -> Option<String> {
        None
    }

    /// Icons.
    fn icons(&self) -> Vec<ResourceIcon> {
        Vec::new()
    }

    /// Whether the process may be suspended.
    fn suspendable(&self) -> bool {
        true
    }

    /// Run on resume.
    async fn activate(&self) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Run on suspend and exit.
    async fn deactivate(&self) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Persistable state.
    fn serialize(&self) -> Value {
        Value::Object(Map::new())
    }

    /// Description shown to the model.
    fn describe(&self) -> Value {
        self.serialize()
    }

    /// Execute a tool call addressed to this process.
    async fn call(&self, call: &ToolCall) -> Result<Value, ProcessError> {
        Err(ProcessError::UnknownCall(call.name.clone()))
    }
}

/// A process the runtime can rebuild from a snapshot.
pub trait RestorableProcess: Process + Sized {
    /// Registered type name. `Process::process_type` should return it.
    const TYPE: &'static str;

    /// Rebuild from the snapshot's `state`.
    fn from_state(state: Value) -> Result<Self, ProcessError>;

    /// Constructor suitable for `Runtime::register_process_type`.
    fn constructor() -> ProcessConstructor {
        Arc::new(|state: Value| -> Result<Arc<dyn Process>, ProcessError> {
            Ok(Arc::new(Self::from_state(state)?))
        })
    }
}
