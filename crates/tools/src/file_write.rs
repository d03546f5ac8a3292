//! File write tool: write or create files.

use async_trait::async_trait;
use std::path::PathBuf;
use taskpilot_core::error::ToolError;
use taskpilot_core::tool::{Tool, ToolContext, ToolOutput, ToolResult};

use crate::file_read::FileReadTool;

pub struct FileWriteTool {
    base_dir: Option<PathBuf>,
}

impl FileWriteTool {
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Resolve relative paths against `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites if it does."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let resolved = FileReadTool::resolve(self.base_dir.as_ref(), path);
        let failed = |e: std::io::Error| ToolError::ExecutionFailed {
            tool_name: "file_write".into(),
            reason: format!("{:?}: {} ({})", e.kind(), e, resolved.display()),
        };

        // Ensure parent directory exists
        if let Some(parent) = resolved.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }

        tokio::fs::write(&resolved, content).await.map_err(failed)?;

        Ok(ToolResult::ok(format!(
            "Successfully wrote {} bytes to {}",
            content.len(),
            resolved.display()
        ))
        .into())
    }
}
