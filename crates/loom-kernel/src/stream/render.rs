//! History → upstream turns.
//!
//! The completion service requires every assistant tool-call turn to be
//! answered by the tool turn right after it. History does not always look
//! like that: a group may still be running, and FIFO eviction can drop the
//! calls of a buffered result message. Both cases are patched here:
//!
//! - calls followed by anything other than their results get a tool turn of
//!   `{"status": "pending"}` placeholders;
//! - results not preceded by their calls get the assistant call turn
//!   re-synthesized (arguments recovered from an earlier buffered call when
//!   possible, `{}` otherwise).

use loom_core::messages::{
    InputMessage, Message, ToolCallsMessage, ToolResult, ToolResultsMessage,
};
use loom_core::turns::{AssistantPart, RenderedTurn, ToolResultPart, UserPart};
use serde_json::{Value, json};

/// Render `messages` in order.
pub fn render_messages(messages: &[Message]) -> Vec<RenderedTurn> {
    let mut turns = Vec::with_capacity(messages.len());
    for (i, message) in messages.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| &messages[p]);
        let next = messages.get(i + 1);
        match message {
            Message::System(m) => turns.push(RenderedTurn::System {
                content: m.text.clone(),
            }),
            Message::Input(m) => turns.extend(render_input(m)),
            Message::Reply(m) => {
                if !m.text.trim().is_empty() {
                    turns.push(RenderedTurn::assistant_text(m.text.clone()));
                }
            }
            Message::Reasoning(_) | Message::Log(_) => {}
            Message::ToolCalls(m) => {
                turns.push(call_turn(m));
                let answered = matches!(next, Some(Message::ToolResults(r)) if r.answers(m));
                if next.is_some() && !answered {
                    turns.push(pending_turn(m));
                }
            }
            Message::ToolResults(m) => {
                let paired = matches!(prev, Some(Message::ToolCalls(c)) if m.answers(c));
                if !paired {
                    turns.push(resynthesized_call_turn(m, &messages[..i]));
                }
                turns.push(RenderedTurn::Tool {
                    content: m.results.iter().map(result_part).collect(),
                });
            }
        }
    }
    turns
}

fn render_input(m: &InputMessage) -> Option<RenderedTurn> {
    let mut content = Vec::with_capacity(1 + m.files.len());
    if let Some(text) = m.text.as_deref().filter(|t| !t.trim().is_empty()) {
        content.push(UserPart::Text { text: text.into() });
    }
    content.extend(m.files.iter().map(|f| UserPart::File {
        data: f.data.clone(),
        filename: f.filename.clone(),
        mime_type: f.mime_type.clone(),
    }));
    (!content.is_empty()).then_some(RenderedTurn::User { content })
}

fn call_turn(m: &ToolCallsMessage) -> RenderedTurn {
    RenderedTurn::Assistant {
        content: m
            .calls
            .iter()
            .map(|c| AssistantPart::ToolCall {
                tool_call_id: c.id.clone(),
                tool_name: c.name.clone(),
                args: c.args.clone(),
            })
            .collect(),
    }
}

fn pending_turn(m: &ToolCallsMessage) -> RenderedTurn {
    RenderedTurn::Tool {
        content: m
            .calls
            .iter()
            .map(|c| ToolResultPart {
                tool_call_id: c.id.clone(),
                tool_name: c.name.clone(),
                result: json!({"status": "pending"}),
            })
            .collect(),
    }
}

fn resynthesized_call_turn(m: &ToolResultsMessage, earlier: &[Message]) -> RenderedTurn {
    RenderedTurn::Assistant {
        content: m
            .results
            .iter()
            .map(|r| AssistantPart::ToolCall {
                tool_call_id: r.call_id.clone(),
                tool_name: r.name.clone(),
                args: find_args(earlier, &r.call_id).unwrap_or_else(|| json!({})),
            })
            .collect(),
    }
}

fn find_args(earlier: &[Message], call_id: &str) -> Option<Value> {
    earlier.iter().rev().find_map(|m| match m {
        Message::ToolCalls(c) => c
            .calls
            .iter()
            .find(|call| call.id == call_id)
            .map(|call| call.args.clone()),
        _ => None,
    })
}

fn result_part(r: &ToolResult) -> ToolResultPart {
    let result = match &r.error {
        Some(error) => json!({"error": error}),
        None => r.output.clone(),
    };
    ToolResultPart {
        tool_call_id: r.call_id.clone(),
        tool_name: r.name.clone(),
        result,
    }
}
