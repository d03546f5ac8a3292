//! ModelClient trait: the "call the model" capability.
//!
//! A ModelClient knows how to send a transcript plus tool catalogue to a
//! language model and return its answer: free text, tool calls, or both.
//! Provider-specific formatting and parsing live in the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ModelError;
use crate::message::{Message, MessageToolCall};
use crate::task::Metadata;

/// A single model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The transcript to replay
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Caller metadata (persona, model selection, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: Metadata,
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// The normalised result of a model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Free text produced by the model (may be empty)
    #[serde(default)]
    pub text: String,

    /// Tool calls requested by the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Provider response before normalisation, for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl ModelResponse {
    /// A text-only response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// A response requesting tool calls, with optional accompanying text.
    pub fn tool_calls(text: impl Into<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            text: text.into(),
            tool_calls,
            ..Self::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core ModelClient trait.
///
/// The step executor calls `complete()` without knowing which provider is
/// behind it. Implementations should abort early when `cancel` fires and
/// return [`ModelError::Cancelled`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openrouter", "scripted").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<ModelResponse, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "shell".into(),
            description: "Execute a shell command".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The command to run" }
                },
                "required": ["command"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("shell"));
        assert!(json.contains("command"));
    }

    #[test]
    fn response_constructors() {
        let plain = ModelResponse::text("Done.");
        assert!(!plain.has_tool_calls());
        assert_eq!(plain.text, "Done.");

        let calls = ModelResponse::tool_calls(
            "",
            vec![MessageToolCall {
                id: "c1".into(),
                name: "shell".into(),
                arguments: "{}".into(),
            }],
        );
        assert!(calls.has_tool_calls());
    }

    #[test]
    fn response_deserializes_with_defaults() {
        let resp: ModelResponse = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(resp.text, "hi");
        assert!(resp.tool_calls.is_empty());
        assert!(resp.raw.is_none());
    }
}
