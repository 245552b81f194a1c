//! Pending tool calls, grouped by the `tool-calls` message that issued them.

use std::collections::HashMap;

use loom_core::messages::{ToolCall, ToolCallsMessage, ToolResult};
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Outcome of recording one result.
#[derive(Debug, PartialEq)]
pub enum Resolution {
    /// The call is not pending (never registered, or already resolved).
    Unknown,
    /// Recorded; other calls of the group are still open.
    Waiting,
    /// Last open call of the group; results in original call order.
    Complete(Vec<ToolResult>),
}

/// A call whose deadline passed.
#[derive(Debug)]
pub struct ExpiredCall {
    /// The call.
    pub call: ToolCall,
    /// Container serving it, when one was spawned.
    pub pid: Option<String>,
    /// Dispatch task still running it.
    pub task: Option<AbortHandle>,
}

#[derive(Debug)]
struct Group {
    results: Vec<Option<ToolResult>>,
    open: usize,
}

#[derive(Debug)]
struct PendingCall {
    call: ToolCall,
    group_id: String,
    index: usize,
    deadline: Option<Instant>,
    pid: Option<String>,
    task: Option<AbortHandle>,
}

/// Open calls keyed by call id, plus their groups keyed by message id.
///
/// Resolving removes the call, so a group completes exactly once no matter
/// how many paths deliver a result for the same call.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<String, PendingCall>,
    groups: HashMap<String, Group>,
}

impl PendingCalls {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every call of `message`. Empty groups are ignored.
    pub fn open_group(&mut self, message: &ToolCallsMessage, deadline: Option<Instant>) {
        if message.calls.is_empty() {
            return;
        }
        for (index, call) in message.calls.iter().enumerate() {
            let _ = self.calls.insert(
                call.id.clone(),
                PendingCall {
                    call: call.clone(),
                    group_id: message.id.clone(),
                    index,
                    deadline,
                    pid: None,
                    task: None,
                },
            );
        }
        let _ = self.groups.insert(
            message.id.clone(),
            Group {
                results: vec![None; message.calls.len()],
                open: message.calls.len(),
            },
        );
    }

    /// Remember the task running `call_id`.
    pub fn attach_task(&mut self, call_id: &str, task: AbortHandle) {
        if let Some(pending) = self.calls.get_mut(call_id) {
            pending.task = Some(task);
        }
    }

    /// Remember the container serving `call_id`. Returns false if the call
    /// is no longer pending.
    pub fn attach_process(&mut self, call_id: &str, pid: impl Into<String>) -> bool {
        match self.calls.get_mut(call_id) {
            Some(pending) => {
                pending.pid = Some(pid.into());
                true
            }
            None => false,
        }
    }

    /// Record `result` against its call.
    pub fn resolve(&mut self, result: ToolResult) -> Resolution {
        let Some(pending) = self.calls.remove(&result.call_id) else {
            return Resolution::Unknown;
        };
        let Some(group) = self.groups.get_mut(&pending.group_id) else {
            return Resolution::Unknown;
        };
        group.results[pending.index] = Some(result);
        group.open -= 1;
        if group.open > 0 {
            return Resolution::Waiting;
        }
        let Some(group) = self.groups.remove(&pending.group_id) else {
            return Resolution::Unknown;
        };
        Resolution::Complete(group.results.into_iter().flatten().collect())
    }

    /// Whether `call_id` is still open.
    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    /// Container serving `call_id`, if any.
    pub fn process_of(&self, call_id: &str) -> Option<&str> {
        self.calls.get(call_id).and_then(|p| p.pid.as_deref())
    }

    /// Earliest deadline among open calls.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.calls.values().filter_map(|p| p.deadline).min()
    }

    /// Open calls whose deadline is at or before `now`. They stay pending
    /// until resolved.
    pub fn expired(&self, now: Instant) -> Vec<ExpiredCall> {
        let mut expired: Vec<_> = self
            .calls
            .values()
            .filter(|p| p.deadline.is_some_and(|d| d <= now))
            .map(|p| ExpiredCall {
                call: p.call.clone(),
                pid: p.pid.clone(),
                task: p.task.clone(),
            })
            .collect();
        expired.sort_by(|a, b| a.call.id.cmp(&b.call.id));
        expired
    }

    /// Number of open calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no call is open.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Number of incomplete groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
