//! Conversation history tool.
//!
//! The transcript of a task starts empty of earlier turns. This tool is the
//! only way for the agent to look back at what was said before the task.

use async_trait::async_trait;
use std::sync::Arc;
use taskpilot_core::channel::HistorySource;
use taskpilot_core::error::ToolError;
use taskpilot_core::message::Role;
use taskpilot_core::tool::{Tool, ToolContext, ToolOutput, ToolResult};
use tracing::debug;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

pub struct ConversationHistoryTool {
    source: Arc<dyn HistorySource>,
}

impl ConversationHistoryTool {
    pub fn new(source: Arc<dyn HistorySource>) -> Self {
        Self { source }
    }
}

fn role_label(role: &Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

#[async_trait]
impl Tool for ConversationHistoryTool {
    fn name(&self) -> &str {
        "conversation_history"
    }

    fn description(&self) -> &str {
        "Retrieve the most recent messages of the current conversation (oldest first). Use this when the request refers to something said earlier."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "How many recent messages to fetch (default 20, max 100)"
                }
            }
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let limit = arguments["limit"]
            .as_u64()
            .map(|n| (n as usize).clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);

        debug!(conversation_id = %ctx.conversation_id, limit, "Fetching conversation history");

        let messages = self
            .source
            .recent(&ctx.conversation_id, limit)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "conversation_history".into(),
                reason: e.to_string(),
            })?;

        if messages.is_empty() {
            return Ok(ToolResult::ok("No earlier messages in this conversation.").into());
        }

        let output = messages
            .iter()
            .map(|m| {
                format!(
                    "[{}] {}: {}",
                    m.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    role_label(&m.role),
                    m.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let data = serde_json::to_value(&messages).ok();
        Ok(ToolOutput::Result(ToolResult {
            success: true,
            output,
            data,
        }))
    }
}
