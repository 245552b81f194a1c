//! Opaque identifiers and the message clock.
//!
//! All identifiers are UUID v7 strings with a short kind prefix so they are
//! recognisable in logs (`msg_…`, `call_…`).

use uuid::Uuid;

/// Prefix for message IDs.
pub const MESSAGE_PREFIX: &str = "msg";
/// Prefix for tool call IDs.
pub const CALL_PREFIX: &str = "call";
/// Prefix for process container IDs.
pub const PROCESS_PREFIX: &str = "proc";
/// Prefix for stream assembler IDs.
pub const STREAM_PREFIX: &str = "stream";

fn prefixed(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

/// Generate a new message ID.
pub fn new_message_id() -> String {
    prefixed(MESSAGE_PREFIX)
}

/// Generate a new tool call ID.
pub fn new_call_id() -> String {
    prefixed(CALL_PREFIX)
}

/// Generate a new process container ID.
pub fn new_process_id() -> String {
    prefixed(PROCESS_PREFIX)
}

/// Generate a new stream assembler ID.
pub fn new_stream_id() -> String {
    prefixed(STREAM_PREFIX)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed() {
        assert!(new_message_id().starts_with("msg_"));
        assert!(new_call_id().starts_with("call_"));
        assert!(new_process_id().starts_with("proc_"));
        assert!(new_stream_id().starts_with("stream_"));
    }

    #[test]
    fn ids_are_unique() {
        let a = new_message_id();
        let b = new_message_id();
        assert_ne!(a, b);
    }

    #[test]
    fn clock_is_positive() {
        assert!(now_millis() > 0);
    }
}
