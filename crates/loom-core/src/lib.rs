//! # loom-core
//!
//! Foundation types for the Loom orchestration kernel.
//!
//! This crate provides the shared vocabulary that the other Loom crates depend on:
//!
//! - **IDs**: [`ids::new_message_id`], [`ids::new_call_id`], [`ids::new_process_id`] and
//!   the millisecond clock used for message timestamps
//! - **Messages**: [`messages::Message`] sum type, [`messages::MessageDelta`] and the
//!   [`messages::StreamItem`] that carries either one
//! - **Tool calls**: [`messages::ToolCall`] and [`messages::ToolResult`]
//! - **Rendered turns**: [`turns::RenderedTurn`], the role-tagged format sent upstream
//! - **Completion interface**: [`completion::CompletionService`] and the
//!   [`completion::CompletionEvent`] stream it produces
//! - **Logging**: [`logging::init_subscriber`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other loom crates.

#![deny(unsafe_code)]

pub mod completion;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod turns;
