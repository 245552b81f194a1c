//! # Completion service interface
//!
//! Boundary to the external streaming text-completion service. The kernel
//! renders its history into [`RenderedTurn`]s, hands them to a
//! [`CompletionService`] together with the tool schema map, and consumes the
//! returned [`CompletionStream`] of [`CompletionEvent`]s.
//!
//! The transport itself (HTTP, SSE, auth) is out of scope for this crate.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::turns::RenderedTurn;

/// Result type alias for completion operations.
pub type CompletionResult<T> = Result<T, CompletionError>;

/// Boxed stream of [`CompletionEvent`]s returned by [`CompletionService::stream`].
pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<CompletionEvent, CompletionError>> + Send>>;

/// Events produced by the upstream service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CompletionEvent {
    /// Incremental reply text.
    TextDelta {
        /// Text fragment.
        delta: String,
    },
    /// Fully formed tool call.
    ToolCall {
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Parsed arguments.
        #[serde(default)]
        args: Value,
    },
    /// Upstream failure reported in-band.
    Error {
        /// Error description.
        error: String,
    },
    /// Generation finished.
    Finish {
        /// Upstream finish reason (`stop`, `tool-calls`, …).
        #[serde(rename = "finishReason", default)]
        finish_reason: String,
    },
}

/// Schema of a tool offered to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: Value,
}

/// A single streaming request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    /// Rendered conversation.
    pub turns: Vec<RenderedTurn>,
    /// Tool name → schema.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, ToolSpec>,
    /// System instructions passed alongside the turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Errors raised while opening or consuming a completion stream.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CompletionError {
    /// The service reported an error event mid-stream.
    #[error("Upstream error: {message}")]
    Upstream {
        /// Error description.
        message: String,
    },

    /// The transport failed (connection, protocol).
    #[error("Transport error: {message}")]
    Transport {
        /// Error description.
        message: String,
        /// Whether this error can be retried.
        retryable: bool,
    },

    /// Stream was cancelled.
    #[error("Stream cancelled")]
    Cancelled,

    /// Service-specific error.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl CompletionError {
    /// Shorthand for an in-band upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Upstream { .. } | Self::Cancelled | Self::Other { .. } => false,
        }
    }

    /// Error category string for event emission.
    pub fn category(&self) -> &str {
        match self {
            Self::Upstream { .. } => "upstream",
            Self::Transport { .. } => "network",
            Self::Cancelled => "cancelled",
            Self::Other { .. } => "unknown",
        }
    }
}

/// External streaming text-completion service.
///
/// Implementors must be `Send + Sync` for use across async tasks.
/// The returned stream is consumed until it ends or yields an error.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Open one streaming completion for `request`.
    async fn stream(&self, request: CompletionRequest) -> CompletionResult<CompletionStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_wire_format() {
        let event: CompletionEvent = serde_json::from_value(json!({
            "type": "tool-call",
            "toolName": "get_weather",
            "args": {"city": "Oslo"}
        }))
        .unwrap();
        assert_eq!(
            event,
            CompletionEvent::ToolCall {
                tool_name: "get_weather".into(),
                args: json!({"city": "Oslo"}),
            }
        );

        let finish = serde_json::to_value(CompletionEvent::Finish {
            finish_reason: "stop".into(),
        })
        .unwrap();
        assert_eq!(finish["type"], "finish");
        assert_eq!(finish["finishReason"], "stop");
    }

    #[test]
    fn request_skips_empty_tools() {
        let request = CompletionRequest::default();
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("instructions").is_none());
        assert_eq!(value["turns"], json!([]));
    }

    #[test]
    fn error_display() {
        assert_eq!(
            CompletionError::upstream("overloaded").to_string(),
            "Upstream error: overloaded"
        );
        assert_eq!(CompletionError::Cancelled.to_string(), "Stream cancelled");
    }

    #[test]
    fn error_retryable() {
        assert!(
            CompletionError::Transport {
                message: "reset".into(),
                retryable: true
            }
            .is_retryable()
        );
        assert!(!CompletionError::upstream("x").is_retryable());
        assert!(!CompletionError::Cancelled.is_retryable());
    }

    #[test]
    fn error_category() {
        assert_eq!(CompletionError::upstream("x").category(), "upstream");
        assert_eq!(CompletionError::Cancelled.category(), "cancelled");
        assert_eq!(
            CompletionError::Other {
                message: "x".into()
            }
            .category(),
            "unknown"
        );
    }
}
