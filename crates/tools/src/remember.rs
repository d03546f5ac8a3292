//! Immediate-memory tool.
//!
//! Lets the model pin a short note that is shown to it on the next model call
//! only. The note never enters the transcript.

use async_trait::async_trait;
use taskpilot_core::error::ToolError;
use taskpilot_core::tool::{Tool, ToolContext, ToolOutput};

pub struct RememberTool;

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember_for_next_step"
    }

    fn description(&self) -> &str {
        "Keep a short note in mind for your very next step only (e.g. an intermediate value or what to check next). The note is not kept afterwards."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "note": {
                    "type": "string",
                    "description": "What to remember for the next step"
                }
            },
            "required": ["note"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let note = arguments["note"]
            .as_str()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'note' argument".into()))?;

        Ok(ToolOutput::ImmediateMemory(note.to_string()))
    }
}
