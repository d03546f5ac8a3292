//! File read tool: read file contents.
//!
//! Relative paths resolve against an optional base directory. Any I/O failure
//! is a [`ToolError`] so the loop can hand the model an `{error, hint}` object.

use async_trait::async_trait;
use std::path::PathBuf;
use taskpilot_core::error::ToolError;
use taskpilot_core::tool::{Tool, ToolContext, ToolOutput, ToolResult};

/// Files larger than this are truncated in the returned output.
const MAX_READ_BYTES: usize = 64 * 1024;

pub struct FileReadTool {
    base_dir: Option<PathBuf>,
}

impl FileReadTool {
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Resolve relative paths against `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    pub(crate) fn resolve(base_dir: Option<&PathBuf>, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        match base_dir {
            Some(base) if p.is_relative() => base.join(p),
            _ => p,
        }
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                }
            },
            "required": ["path"]
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

        let resolved = Self::resolve(self.base_dir.as_ref(), path);

        let mut content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "file_read".into(),
                reason: format!("{:?}: {} ({})", e.kind(), e, resolved.display()),
            })?;

        if content.len() > MAX_READ_BYTES {
            let mut cut = MAX_READ_BYTES;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("\n[truncated]");
        }

        Ok(ToolResult::ok(content).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use taskpilot_core::message::ConversationId;
    use taskpilot_core::task::TaskId;
    use taskpilot_core::CancellationToken;

    fn ctx() -> ToolContext {
        ToolContext {
            task_id: TaskId::from("t"),
            conversation_id: ConversationId::from("c"),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn tool_definition() {
        let tool = FileReadTool::new();
        assert_eq!(tool.name(), "file_read");
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["path"]));
        assert!(schema["properties"]["path"].is_object());
    }

    #[tokio::test]
    async fn read_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("test.txt");
        let mut f = std::fs::File::create(&file_path).unwrap();
        writeln!(f, "Hello, world!").unwrap();

        let tool = FileReadTool::new();
        let output = tool
            .execute(
                serde_json::json!({ "path": file_path.to_str().unwrap() }),
                &ctx(),
            )
            .await
            .unwrap();

        match output {
            ToolOutput::Result(result) => {
                assert!(result.success);
                assert!(result.output.contains("Hello, world!"));
            }
            other => panic!("Expected result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn relative_path_uses_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# notes").unwrap();

        let tool = FileReadTool::with_base_dir(dir.path());
        let output = tool
            .execute(serde_json::json!({ "path": "notes.md" }), &ctx())
            .await
            .unwrap();
        assert!(matches!(output, ToolOutput::Result(r) if r.output == "# notes"));
    }

    #[tokio::test]
    async fn read_nonexistent_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileReadTool::new();
        let err = tool
            .execute(
                serde_json::json!({
                    "path": dir.path().join("missing.txt").to_str().unwrap()
                }),
                &ctx(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
        assert!(err.to_string().contains("NotFound"));
    }

    #[tokio::test]
    async fn missing_path_argument() {
        let tool = FileReadTool::new();
        let result = tool.execute(serde_json::json!({}), &ctx()).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
