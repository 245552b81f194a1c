//! Message model for the kernel history.
//!
//! Kernel messages are organised by semantic kind (input, reply, reasoning,
//! tool calls…) rather than conversational role. Role mapping only happens at
//! the upstream boundary, see [`crate::turns`].
//!
//! - [`Message`] is an immutable, timestamped history entry.
//! - [`MessageDelta`] is a transient partial update of an in-progress message.
//!   Only replies stream incrementally.
//! - [`StreamItem`] is what the stream assembler yields and what subscribers
//!   receive: either a complete message or a delta.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{new_call_id, new_message_id, now_millis};

// ─────────────────────────────────────────────────────────────────────────────
// Tool calls and results
// ─────────────────────────────────────────────────────────────────────────────

/// A request from the model to execute a named tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    /// Create a tool call with a freshly generated ID.
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: new_call_id(),
            name: name.into(),
            args,
        }
    }
}

/// The correlated outcome of a [`ToolCall`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// ID of the call this result answers.
    pub call_id: String,
    /// Name of the tool that produced it.
    pub name: String,
    /// Tool output (`null` when the call failed).
    #[serde(default)]
    pub output: Value,
    /// Error description when execution failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Successful result for `call`.
    pub fn success(call: &ToolCall, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            error: None,
        }
    }

    /// Failed result for `call`.
    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output: Value::Null,
            error: Some(error.into()),
        }
    }

    /// Whether this result carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Binary attachment on an input message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    /// Raw file content.
    pub data: Vec<u8>,
    /// Original filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// System instruction injected into the conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    /// Message ID.
    pub id: String,
    /// Creation time (ms).
    pub timestamp: i64,
    /// Instruction text.
    pub text: String,
}

/// Caller input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    /// Message ID.
    pub id: String,
    /// Creation time (ms).
    pub timestamp: i64,
    /// Input text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Attached files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
}

/// Model reply text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyMessage {
    /// Message ID.
    pub id: String,
    /// Creation time (ms).
    pub timestamp: i64,
    /// Reply text.
    pub text: String,
}

/// Summarised reasoning step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReasoningMessage {
    /// Message ID.
    pub id: String,
    /// Creation time (ms).
    pub timestamp: i64,
    /// Short title.
    pub title: String,
    /// Summary body.
    pub summary: String,
}

/// Kernel-internal log line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Message ID.
    pub id: String,
    /// Creation time (ms).
    pub timestamp: i64,
    /// Log text.
    pub text: String,
}

/// A group of tool calls issued together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallsMessage {
    /// Message ID (also the group ID for pending-call bookkeeping).
    pub id: String,
    /// Creation time (ms).
    pub timestamp: i64,
    /// Calls in issue order.
    pub calls: Vec<ToolCall>,
}

impl ToolCallsMessage {
    /// IDs of all calls in issue order.
    pub fn call_ids(&self) -> impl Iterator<Item = &str> {
        self.calls.iter().map(|c| c.id.as_str())
    }
}

/// Results for a completed tool-call group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultsMessage {
    /// Message ID.
    pub id: String,
    /// Creation time (ms).
    pub timestamp: i64,
    /// Results in original call order.
    pub results: Vec<ToolResult>,
}

impl ToolResultsMessage {
    /// Whether this message answers every call in `calls`.
    pub fn answers(&self, calls: &ToolCallsMessage) -> bool {
        calls
            .call_ids()
            .all(|id| self.results.iter().any(|r| r.call_id == id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// A history entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// System instruction.
    System(SystemMessage),
    /// Caller input.
    Input(InputMessage),
    /// Model reply.
    Reply(ReplyMessage),
    /// Reasoning summary.
    Reasoning(ReasoningMessage),
    /// Kernel log line.
    Log(LogMessage),
    /// Tool call group.
    ToolCalls(ToolCallsMessage),
    /// Tool result group.
    ToolResults(ToolResultsMessage),
}

impl Message {
    /// New system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System(SystemMessage {
            id: new_message_id(),
            timestamp: now_millis(),
            text: text.into(),
        })
    }

    /// New text input message.
    pub fn input(text: impl Into<String>) -> Self {
        Self::Input(InputMessage {
            id: new_message_id(),
            timestamp: now_millis(),
            text: Some(text.into()),
            files: Vec::new(),
        })
    }

    /// New input message with attachments.
    pub fn input_with_files(text: Option<String>, files: Vec<FileAttachment>) -> Self {
        Self::Input(InputMessage {
            id: new_message_id(),
            timestamp: now_millis(),
            text,
            files,
        })
    }

    /// New reply message.
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply(ReplyMessage {
            id: new_message_id(),
            timestamp: now_millis(),
            text: text.into(),
        })
    }

    /// New reasoning message.
    pub fn reasoning(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::Reasoning(ReasoningMessage {
            id: new_message_id(),
            timestamp: now_millis(),
            title: title.into(),
            summary: summary.into(),
        })
    }

    /// New log message.
    pub fn log(text: impl Into<String>) -> Self {
        Self::Log(LogMessage {
            id: new_message_id(),
            timestamp: now_millis(),
            text: text.into(),
        })
    }

    /// New tool-calls message.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::ToolCalls(ToolCallsMessage {
            id: new_message_id(),
            timestamp: now_millis(),
            calls,
        })
    }

    /// New tool-results message.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::ToolResults(ToolResultsMessage {
            id: new_message_id(),
            timestamp: now_millis(),
            results,
        })
    }

    /// Message ID.
    pub fn id(&self) -> &str {
        match self {
            Self::System(m) => &m.id,
            Self::Input(m) => &m.id,
            Self::Reply(m) => &m.id,
            Self::Reasoning(m) => &m.id,
            Self::Log(m) => &m.id,
            Self::ToolCalls(m) => &m.id,
            Self::ToolResults(m) => &m.id,
        }
    }

    /// Creation time (ms).
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::System(m) => m.timestamp,
            Self::Input(m) => m.timestamp,
            Self::Reply(m) => m.timestamp,
            Self::Reasoning(m) => m.timestamp,
            Self::Log(m) => m.timestamp,
            Self::ToolCalls(m) => m.timestamp,
            Self::ToolResults(m) => m.timestamp,
        }
    }

    /// Wire name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Input(_) => "input",
            Self::Reply(_) => "reply",
            Self::Reasoning(_) => "reasoning",
            Self::Log(_) => "log",
            Self::ToolCalls(_) => "tool-calls",
            Self::ToolResults(_) => "tool-results",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deltas
// ─────────────────────────────────────────────────────────────────────────────

/// Partial fields carried by a delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "kebab-case")]
pub enum DeltaBody {
    /// Text appended to a reply.
    Reply {
        /// Text fragment (may be empty).
        text: String,
    },
}

impl DeltaBody {
    /// Text fragment carried by this delta.
    pub fn text(&self) -> &str {
        match self {
            Self::Reply { text } => text,
        }
    }
}

/// Incremental update of an in-progress message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    /// ID of the message being built.
    pub id: String,
    /// Timestamp of the message being built.
    pub timestamp: i64,
    /// Partial fields.
    pub delta: DeltaBody,
    /// Set on the closing delta, which is immediately followed by the complete message.
    #[serde(rename = "final", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_final: bool,
}

impl MessageDelta {
    /// Reply delta carrying `text`.
    pub fn reply(id: impl Into<String>, timestamp: i64, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            delta: DeltaBody::Reply { text: text.into() },
            is_final: false,
        }
    }

    /// Closing reply delta (empty text, `final` set).
    pub fn reply_final(id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            is_final: true,
            ..Self::reply(id, timestamp, "")
        }
    }
}

/// Either a complete message or a delta, in emission order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamItem {
    /// Complete message.
    Message(Message),
    /// Partial update.
    Delta(MessageDelta),
}

impl StreamItem {
    /// ID of the message this item belongs to.
    pub fn id(&self) -> &str {
        match self {
            Self::Message(m) => m.id(),
            Self::Delta(d) => &d.id,
        }
    }
}

impl From<Message> for StreamItem {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<MessageDelta> for StreamItem {
    fn from(delta: MessageDelta) -> Self {
        Self::Delta(delta)
    }
}
