use serde::{Deserialize, Serialize};

/// Default number of messages kept in the kernel history window.
pub const DEFAULT_MESSAGE_LIMIT: usize = 100;
/// Default broadcast channel capacity for kernel and runtime events.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;
/// Default deadline for a single tool call (10 minutes).
pub const DEFAULT_TOOL_CALL_TIMEOUT_MS: u64 = 600_000;

/// Kernel session settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KernelSettings {
    /// Maximum number of messages in the history window (oldest evicted first).
    pub message_limit: usize,
    /// Broadcast channel capacity for event subscribers.
    pub event_capacity: usize,
    /// Per-call deadline in milliseconds. `0` disables the deadline.
    pub tool_call_timeout_ms: u64,
    /// System instructions sent with every completion request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            message_limit: DEFAULT_MESSAGE_LIMIT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            tool_call_timeout_ms: DEFAULT_TOOL_CALL_TIMEOUT_MS,
            instructions: None,
        }
    }
}

impl KernelSettings {
    /// Tool call deadline, `None` when disabled.
    pub fn tool_call_timeout(&self) -> Option<std::time::Duration> {
        (self.tool_call_timeout_ms > 0)
            .then(|| std::time::Duration::from_millis(self.tool_call_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_disables_deadline() {
        let settings = KernelSettings {
            tool_call_timeout_ms: 0,
            ..KernelSettings::default()
        };
        assert!(settings.tool_call_timeout().is_none());
    }

    #[test]
    fn default_timeout_is_ten_minutes() {
        let timeout = KernelSettings::default().tool_call_timeout().unwrap();
        assert_eq!(timeout.as_secs(), 600);
    }
}
