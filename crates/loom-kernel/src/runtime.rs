//! Process runtime: registry and supervisor of live containers.
//!
//! The runtime owns every live [`ProcessContainer`], keyed by id, plus a
//! `type → constructor` registry used by [`Runtime::restore`] and by resume
//! after suspend. Container events are re-broadcast as [`RuntimeEvent`]s
//! tagged with the container id; an exiting container is removed from the
//! table as part of forwarding its `Exit` event.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use loom_core::ids::new_process_id;
use loom_core::messages::{ToolCall, ToolResult};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::errors::RuntimeError;
use crate::event_emitter::EventEmitter;
use crate::process::{
    ContainerEvent, Process, ProcessConstructor, ProcessContainer, ProcessSnapshot, ProcessStatus,
    RestorableProcess,
};

/// Process events, each tagged with the container id.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum RuntimeEvent {
    /// A process was spawned.
    #[serde(rename = "process-created")]
    Created {
        /// Container id.
        pid: String,
    },
    /// A container was rebuilt from a snapshot.
    #[serde(rename = "process-restored")]
    Restored {
        /// Container id.
        pid: String,
    },
    /// Process state changed.
    #[serde(rename = "process-changed")]
    Changed {
        /// Container id.
        pid: String,
    },
    /// Process activated.
    #[serde(rename = "process-resumed")]
    Resumed {
        /// Container id.
        pid: String,
    },
    /// Process suspended.
    #[serde(rename = "process-suspended")]
    Suspended {
        /// Container id.
        pid: String,
    },
    /// Container exited and was removed.
    #[serde(rename = "process-exited")]
    Exited {
        /// Container id.
        pid: String,
    },
    /// A call on a process finished.
    #[serde(rename = "tool-result")]
    ToolResult {
        /// Container id.
        pid: String,
        /// The result.
        result: ToolResult,
    },
}

impl RuntimeEvent {
    /// Container id this event is about.
    pub fn pid(&self) -> &str {
        match self {
            Self::Created { pid }
            | Self::Restored { pid }
            | Self::Changed { pid }
            | Self::Resumed { pid }
            | Self::Suspended { pid }
            | Self::Exited { pid }
            | Self::ToolResult { pid, .. } => pid,
        }
    }

    /// Wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "process-created",
            Self::Restored { .. } => "process-restored",
            Self::Changed { .. } => "process-changed",
            Self::Resumed { .. } => "process-resumed",
            Self::Suspended { .. } => "process-suspended",
            Self::Exited { .. } => "process-exited",
            Self::ToolResult { .. } => "tool-result",
        }
    }
}

/// Registry and supervisor of process containers.
pub struct Runtime {
    me: Weak<Runtime>,
    processes: DashMap<String, Arc<ProcessContainer>>,
    constructors: RwLock<HashMap<String, ProcessConstructor>>,
    emitter: EventEmitter<RuntimeEvent>,
}

impl Runtime {
    /// Runtime with the default event capacity.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(crate::event_emitter::DEFAULT_CAPACITY)
    }

    /// Runtime whose event channel holds `capacity` events.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            processes: DashMap::new(),
            constructors: RwLock::new(HashMap::new()),
            emitter: EventEmitter::with_capacity(capacity),
        })
    }

    /// Subscribe to process events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.emitter.subscribe()
    }

    // ── Registry ────────────────────────────────────────────────────────

    /// Register the constructor for `process_type`.
    pub fn register_process_type(
        &self,
        process_type: impl Into<String>,
        constructor: ProcessConstructor,
    ) -> Result<(), RuntimeError> {
        let process_type = process_type.into();
        if process_type.is_empty() {
            return Err(RuntimeError::EmptyProcessType);
        }
        let mut constructors = self.constructors.write();
        if constructors.contains_key(&process_type) {
            return Err(RuntimeError::DuplicateProcessType(process_type));
        }
        debug!(process_type, "process type registered");
        let _ = constructors.insert(process_type, constructor);
        Ok(())
    }

    /// Register a [`RestorableProcess`] under its `TYPE`.
    pub fn register<P: RestorableProcess>(&self) -> Result<(), RuntimeError> {
        self.register_process_type(P::TYPE, P::constructor())
    }

    /// Whether a constructor is registered for `process_type`.
    pub fn has_process_type(&self, process_type: &str) -> bool {
        self.constructors.read().contains_key(process_type)
    }

    fn constructor_for(&self, process_type: &str) -> Option<ProcessConstructor> {
        self.constructors.read().get(process_type).cloned()
    }

    // ── Supervision ─────────────────────────────────────────────────────

    /// Wrap `process` in a new container, register it and resume it.
    ///
    /// If activation fails, or this future is dropped before activation
    /// finishes, the container is unregistered again.
    #[instrument(skip_all, fields(pid))]
    pub async fn spawn(
        &self,
        process: Arc<dyn Process>,
    ) -> Result<Arc<ProcessContainer>, RuntimeError> {
        let constructor = process
            .process_type()
            .and_then(|t| self.constructor_for(t));
        let container = ProcessContainer::new(new_process_id(), process, constructor);
        let _ = tracing::Span::current().record("pid", container.id());

        let registration = self.attach(&container);
        let _ = self.emitter.emit(RuntimeEvent::Created {
            pid: container.id().to_owned(),
        });

        if let Err(e) = container.resume().await {
            warn!(error = %e, "process failed to start");
            return Err(e);
        }
        registration.commit();
        info!(name = ?container.name(), "process spawned");
        Ok(container)
    }

    /// Rebuild a container from `snapshot`, keeping its id.
    ///
    /// The container is resumed only if the snapshot was running; a
    /// suspended snapshot stays suspended and no process is built yet.
    /// A failed resume unregisters the container, so the id can be
    /// restored again.
    #[instrument(skip_all, fields(pid = %snapshot.id, process_type = ?snapshot.process_type))]
    pub async fn restore(
        &self,
        snapshot: ProcessSnapshot,
    ) -> Result<Arc<ProcessContainer>, RuntimeError> {
        let Some(process_type) = snapshot.process_type.clone().filter(|t| !t.is_empty()) else {
            return Err(RuntimeError::MissingProcessType(snapshot.id));
        };
        let constructor = self
            .constructor_for(&process_type)
            .ok_or(RuntimeError::UnregisteredProcessType(process_type))?;
        if self.processes.contains_key(&snapshot.id) {
            return Err(RuntimeError::ProcessExists(snapshot.id));
        }

        let resume = snapshot.status == ProcessStatus::Running;
        let container = ProcessContainer::from_snapshot(snapshot, constructor);
        let registration = self.attach(&container);
        let _ = self.emitter.emit(RuntimeEvent::Restored {
            pid: container.id().to_owned(),
        });

        if resume && let Err(e) = container.resume().await {
            warn!(error = %e, "restored process failed to start");
            return Err(e);
        }
        registration.commit();
        info!(resume, "process restored");
        Ok(container)
    }

    /// Live container by id.
    pub fn find(&self, id: &str) -> Option<Arc<ProcessContainer>> {
        self.processes.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn get(&self, id: &str) -> Result<Arc<ProcessContainer>, RuntimeError> {
        self.find(id)
            .ok_or_else(|| RuntimeError::ProcessNotFound(id.to_owned()))
    }

    /// Suspend (when possible) and remove a container.
    ///
    /// Removal happens even if suspending fails. Unknown ids are an error.
    #[instrument(skip(self))]
    pub async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        let (_, container) = self
            .processes
            .remove(id)
            .ok_or_else(|| RuntimeError::ProcessNotFound(id.to_owned()))?;
        self.record_gauge();

        if container.status() == ProcessStatus::Running && container.suspendable() {
            if let Err(e) = container.suspend().await {
                warn!(error = %e, "suspend failed during kill");
            }
        }
        info!("process killed");
        Ok(())
    }

    /// Kill every live container.
    pub async fn killall(&self) {
        let ids: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            // Containers may exit on their own while we iterate.
            if let Err(e) = self.kill(&id).await {
                debug!(pid = %id, error = %e, "skipping kill");
            }
        }
    }

    /// Snapshot of the live containers.
    pub fn processes(&self) -> Vec<Arc<ProcessContainer>> {
        self.processes.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Number of live containers.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether no containers are live.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Resume the container if needed, then call it.
    pub async fn call(&self, id: &str, call: &ToolCall) -> Result<ToolResult, RuntimeError> {
        let container = self.get(id)?;
        if container.status() == ProcessStatus::Suspended {
            container.resume().await?;
        }
        container.call(call).await
    }

    /// Suspend a live container.
    pub async fn suspend(&self, id: &str) -> Result<(), RuntimeError> {
        self.get(id)?.suspend().await
    }

    /// Resume a live container.
    pub async fn resume(&self, id: &str) -> Result<(), RuntimeError> {
        self.get(id)?.resume().await
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn attach(&self, container: &Arc<ProcessContainer>) -> Registration<'_> {
        let runtime = self.me.clone();
        let pid = container.id().to_owned();
        container.subscribe(move |event| {
            let Some(runtime) = runtime.upgrade() else {
                return;
            };
            let pid = pid.clone();
            let forwarded = match event {
                ContainerEvent::Change => RuntimeEvent::Changed { pid },
                ContainerEvent::Resume => RuntimeEvent::Resumed { pid },
                ContainerEvent::Suspend => RuntimeEvent::Suspended { pid },
                ContainerEvent::Exit => {
                    runtime.remove(&pid);
                    RuntimeEvent::Exited { pid }
                }
                ContainerEvent::ToolResult(result) => RuntimeEvent::ToolResult {
                    pid,
                    result: result.clone(),
                },
            };
            let _ = runtime.emitter.emit(forwarded);
        });
        let _ = self
            .processes
            .insert(container.id().to_owned(), Arc::clone(container));
        self.record_gauge();
        Registration {
            runtime: self,
            pid: Some(container.id().to_owned()),
        }
    }

    fn remove(&self, id: &str) {
        if self.processes.remove(id).is_some() {
            self.record_gauge();
        }
    }

    fn record_gauge(&self) {
        metrics::gauge!("processes_active").set(self.processes.len() as f64);
    }
}

/// Unregisters a freshly attached container on drop unless committed.
struct Registration<'a> {
    runtime: &'a Runtime,
    pid: Option<String>,
}

impl Registration<'_> {
    fn commit(mut self) {
        self.pid = None;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            debug!(pid, "dropping unstarted process");
            self.runtime.remove(&pid);
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("processes", &self.processes.len())
            .field("process_types", &self.constructors.read().len())
            .finish_non_exhaustive()
    }
}
