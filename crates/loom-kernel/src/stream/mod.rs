//! Completion streams: rendering history into turns and assembling the
//! upstream event stream back into messages.

pub mod assembler;
pub mod render;

pub use assembler::{StreamAssembler, StreamHandle};
pub use render::render_messages;
