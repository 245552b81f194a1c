//! # loom-kernel
//!
//! Session kernel, stream assembly and process runtime.
//!
//! - **Kernel**: bounded history, idle/busy state, latest-input-wins sends,
//!   tool dispatch and the tool-results follow-up loop
//! - **Stream**: renders history into role-tagged turns and assembles the
//!   completion event stream into messages and reply deltas
//! - **Process**: the [`Process`] trait, [`ProcessState`], the
//!   [`ProcessContainer`] lifecycle wrapper and the built-in [`PromiseProcess`]
//! - **Runtime**: registry and supervisor of live containers, with
//!   snapshot restore by process type
//! - **Tools**: execute-style and process-style tools, keyed by name
//!
//! ## Crate Position
//!
//! Top layer. Depends on: loom-core, loom-settings.

#![deny(unsafe_code)]

pub mod errors;
pub mod event_emitter;
pub mod kernel;
pub mod process;
pub mod runtime;
pub mod stream;
pub mod tools;

pub use errors::{KernelError, ProcessError, RuntimeError, ToolError};
pub use event_emitter::EventEmitter;
pub use kernel::{Kernel, KernelConfig, KernelEvent, KernelStatus, SendOutcome};
pub use process::{
    ContainerEvent, Process, ProcessContainer, ProcessHandle, ProcessSnapshot, ProcessState,
    ProcessStatus, PromiseProcess, RestorableProcess,
};
pub use runtime::{Runtime, RuntimeEvent};
pub use stream::{StreamAssembler, StreamHandle, render_messages};
pub use tools::{ExecuteTool, Tool, ToolHandler, ToolRegistry};
