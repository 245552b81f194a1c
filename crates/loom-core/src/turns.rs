//! Role-tagged conversation turns sent to the completion service.
//!
//! The kernel history is organised by message kind; the upstream service
//! expects `system` / `user` / `assistant` / `tool` turns with strict
//! call/result pairing. These types are the upstream shape only. The mapping
//! from history lives in the kernel's renderer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One role-tagged turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum RenderedTurn {
    /// System instruction.
    System {
        /// Instruction text.
        content: String,
    },
    /// User turn.
    User {
        /// Text and file parts.
        content: Vec<UserPart>,
    },
    /// Assistant turn.
    Assistant {
        /// Text and tool-call parts.
        content: Vec<AssistantPart>,
    },
    /// Tool results turn.
    Tool {
        /// One part per answered call.
        content: Vec<ToolResultPart>,
    },
}

impl RenderedTurn {
    /// Role name as sent upstream.
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    /// Plain user text turn.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::User {
            content: vec![UserPart::Text { text: text.into() }],
        }
    }

    /// Plain assistant text turn.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: vec![AssistantPart::Text { text: text.into() }],
        }
    }
}

/// Part of a user turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UserPart {
    /// Text content.
    Text {
        /// Text.
        text: String,
    },
    /// Attached file.
    File {
        /// Raw bytes.
        data: Vec<u8>,
        /// Original filename.
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        /// MIME type.
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// Part of an assistant turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AssistantPart {
    /// Text content.
    Text {
        /// Text.
        text: String,
    },
    /// Tool call issued by the assistant.
    ToolCall {
        /// Call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Call arguments.
        args: Value,
    },
}

/// Result part of a tool turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    /// Call ID being answered.
    pub tool_call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Result payload.
    pub result: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turn_role_tag() {
        let turn = RenderedTurn::user_text("hi");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(turn.role(), "user");
    }

    #[test]
    fn tool_call_part_wire_names() {
        let part = AssistantPart::ToolCall {
            tool_call_id: "call_1".into(),
            tool_name: "get_weather".into(),
            args: json!({}),
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "tool-call");
        assert_eq!(value["toolCallId"], "call_1");
        assert_eq!(value["toolName"], "get_weather");
    }

    #[test]
    fn tool_result_part_wire_names() {
        let part = ToolResultPart {
            tool_call_id: "call_1".into(),
            tool_name: "t".into(),
            result: json!({"status": "pending"}),
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["toolCallId"], "call_1");
        assert_eq!(value["result"]["status"], "pending");
    }
}
