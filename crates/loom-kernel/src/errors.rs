//! Kernel error types.
//!
//! - [`ProcessError`]: raised by process code (activate, deactivate, call).
//! - [`RuntimeError`]: supervisor and container misuse, plus wrapped process failures.
//! - [`ToolError`]: direct tool execution failures. Never propagated out of the
//!   kernel; recorded on the [`ToolResult`](loom_core::messages::ToolResult) instead.
//! - [`KernelError`]: what `Kernel` operations return.

use loom_core::completion::CompletionError;

/// Failures raised by a process implementation.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProcessError {
    /// The process does not handle the requested call.
    #[error("Unknown call: {0}")]
    UnknownCall(String),

    /// Persisted state could not be interpreted.
    #[error("Invalid process state: {0}")]
    InvalidState(String),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl ProcessError {
    /// Error category string for event emission.
    pub fn category(&self) -> &str {
        match self {
            Self::UnknownCall(_) => "unknown_call",
            Self::InvalidState(_) => "invalid_state",
            Self::Failed(_) => "failed",
        }
    }
}

impl From<serde_json::Error> for ProcessError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidState(err.to_string())
    }
}

/// Errors from the process runtime and its containers.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A constructor was registered with an empty type name.
    #[error("Process type must not be empty")]
    EmptyProcessType,

    /// A constructor was registered twice for the same type.
    #[error("Constructor already registered for process type '{0}'")]
    DuplicateProcessType(String),

    /// A snapshot without a type cannot be restored.
    #[error("Snapshot {0} has no process type")]
    MissingProcessType(String),

    /// No constructor is registered for this type.
    #[error("No constructor registered for process type '{0}'")]
    UnregisteredProcessType(String),

    /// A process with this id is already live.
    #[error("Process already exists: {0}")]
    ProcessExists(String),

    /// No live process has this id.
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    /// Suspend requires an attached process.
    #[error("No process attached to container {0}")]
    NoProcessAttached(String),

    /// The attached process refuses suspension.
    #[error("Process {0} is not suspendable")]
    NotSuspendable(String),

    /// Calls require a running container.
    #[error("Process {0} is not running")]
    NotRunning(String),

    /// The container has exited.
    #[error("Process {0} has exited")]
    Exited(String),

    /// Failure raised by the process itself.
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),
}

impl RuntimeError {
    /// Error category string for event emission.
    pub fn category(&self) -> &str {
        match self {
            Self::EmptyProcessType
            | Self::DuplicateProcessType(_)
            | Self::MissingProcessType(_)
            | Self::UnregisteredProcessType(_) => "registry",
            Self::ProcessExists(_) | Self::ProcessNotFound(_) => "lookup",
            Self::NoProcessAttached(_)
            | Self::NotSuspendable(_)
            | Self::NotRunning(_)
            | Self::Exited(_) => "lifecycle",
            Self::Process(e) => e.category(),
        }
    }
}

/// Failures from a directly executed tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Arguments did not match what the tool expects.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

/// Errors returned by kernel operations.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The model requested a tool that is not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Two tools were registered under one name.
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// The completion stream failed.
    #[error("Stream error: {0}")]
    Stream(#[from] CompletionError),

    /// Process runtime failure.
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl KernelError {
    /// Whether this is a configuration or caller bug rather than an upstream failure.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UnknownTool(_) | Self::DuplicateTool(_) | Self::Runtime(_) => true,
            Self::Stream(_) => false,
        }
    }

    /// Error category string for event emission.
    pub fn category(&self) -> &str {
        match self {
            Self::UnknownTool(_) | Self::DuplicateTool(_) => "tool",
            Self::Stream(e) => e.category(),
            Self::Runtime(e) => e.category(),
        }
    }
}
