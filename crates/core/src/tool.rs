//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world:
//! execute shell commands, read/write files, look up history, etc.
//! A [`ToolSet`] is the ordered catalogue offered to the model; control
//! tools appear in it as definitions without an implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::message::ConversationId;
use crate::model::ToolDefinition;
use crate::task::TaskId;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Parse a transcript tool call. Malformed argument JSON becomes `{}`.
    pub fn from_message(call: &crate::message::MessageToolCall) -> Self {
        let arguments = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        }
    }

    /// String argument lookup.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: None,
        }
    }
}

/// What a tool hands back to the loop.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// An ordinary result, echoed into the transcript.
    Result(ToolResult),
    /// A one-shot note for the next model call only; never stored.
    ImmediateMemory(String),
}

impl From<ToolResult> for ToolOutput {
    fn from(result: ToolResult) -> Self {
        Self::Result(result)
    }
}

/// Ambient information passed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub task_id: TaskId,
    pub conversation_id: ConversationId,
    /// Fires when the owning task is stopped.
    pub cancel: CancellationToken,
}

/// The core Tool trait.
///
/// Each tool (shell, file_read, conversation_history, etc.) implements this
/// trait and is placed in a [`ToolSet`] handed to the task runner.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// One catalogue entry: what the model sees, plus how to run it (if anything).
#[derive(Clone)]
struct ToolEntry {
    definition: ToolDefinition,
    handler: Option<Arc<dyn Tool>>,
}

/// An ordered tool catalogue.
///
/// Order is preserved because it is the order the model sees. Adding a tool
/// whose name already exists replaces the earlier entry in place.
#[derive(Clone, Default)]
pub struct ToolSet {
    entries: Vec<ToolEntry>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executable tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let definition = tool.to_definition();
        self.insert(ToolEntry {
            definition,
            handler: Some(tool),
        });
    }

    /// Register a definition the loop interprets itself (no implementation).
    pub fn register_definition(&mut self, definition: ToolDefinition) {
        self.insert(ToolEntry {
            definition,
            handler: None,
        });
    }

    fn insert(&mut self, entry: ToolEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.definition.name == entry.definition.name)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Append every entry of `other`, keeping this set's entries first.
    pub fn merge(mut self, other: &ToolSet) -> Self {
        for entry in &other.entries {
            self.insert(entry.clone());
        }
        self
    }

    /// Keep only the entries whose name satisfies `keep`, preserving order.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|e| keep(e.definition.name.as_str()));
    }

    /// Get a tool implementation by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries
            .iter()
            .find(|e| e.definition.name == name)
            .and_then(|e| e.handler.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.definition.name == name)
    }

    /// Get all tool definitions (for sending to the model), in order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    /// List all tool names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.definition.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Execute a tool call.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(call.arguments.clone(), ctx).await
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolOutput, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult::ok(text).into())
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            task_id: TaskId::from("task-1"),
            conversation_id: ConversationId::from("conv-1"),
            cancel: CancellationToken::new(),
        }
    }

    fn control_def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: "control".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut set = ToolSet::new();
        set.register(Arc::new(EchoTool));
        assert!(set.get("echo").is_some());
        assert!(set.get("nonexistent").is_none());
    }

    #[test]
    fn definition_only_entries_have_no_handler() {
        let mut set = ToolSet::new();
        set.register_definition(control_def("task_complete"));
        assert!(set.contains("task_complete"));
        assert!(set.get("task_complete").is_none());
        assert_eq!(set.definitions().len(), 1);
    }

    #[test]
    fn merge_preserves_order() {
        let mut control = ToolSet::new();
        control.register_definition(control_def("task_complete"));
        control.register_definition(control_def("ask_user"));
        let mut domain = ToolSet::new();
        domain.register(Arc::new(EchoTool));

        let merged = control.merge(&domain);
        assert_eq!(merged.names(), vec!["task_complete", "ask_user", "echo"]);
    }

    #[test]
    fn retain_drops_by_name() {
        let mut set = ToolSet::new();
        set.register_definition(control_def("task_complete"));
        set.register(Arc::new(EchoTool));
        set.register_definition(control_def("ask_user"));

        set.retain(|name| name != "task_complete");
        assert_eq!(set.names(), vec!["echo", "ask_user"]);
        assert!(set.get("echo").is_some());
    }

    #[test]
    fn duplicate_name_replaces_in_place() {
        let mut set = ToolSet::new();
        set.register_definition(control_def("echo"));
        set.register_definition(control_def("other"));
        set.register(Arc::new(EchoTool));
        assert_eq!(set.names(), vec!["echo", "other"]);
        assert!(set.get("echo").is_some());
    }

    #[tokio::test]
    async fn execute_tool() {
        let mut set = ToolSet::new();
        set.register(Arc::new(EchoTool));

        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "hello world"}),
        };
        match set.execute(&call, &ctx()).await.unwrap() {
            ToolOutput::Result(result) => {
                assert!(result.success);
                assert_eq!(result.output, "hello world");
            }
            other => panic!("Expected a plain result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execute_missing_tool() {
        let set = ToolSet::new();
        let call = ToolCall {
            id: "call_1".into(),
            name: "nonexistent".into(),
            arguments: serde_json::json!({}),
        };
        let err = set.execute(&call, &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        let call = ToolCall::from_message(&crate::message::MessageToolCall {
            id: "c".into(),
            name: "ask_user".into(),
            arguments: "not json".into(),
        });
        assert!(call.arguments.as_object().unwrap().is_empty());
        assert!(call.str_arg("question").is_none());
    }
}
