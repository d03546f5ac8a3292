//! Control tools: actions the loop interprets itself.
//!
//! These are offered to the model like any other tool but have no
//! implementation in the [`ToolSet`]; the step executor recognises them by
//! name before generic dispatch.

use taskpilot_core::model::ToolDefinition;
use taskpilot_core::tool::{ToolCall, ToolSet};

pub const TASK_COMPLETE: &str = "task_complete";
pub const ASK_USER: &str = "ask_user";
pub const SEND_UPDATE: &str = "send_update";

const DEFAULT_SUMMARY: &str = "Task completed.";
const DEFAULT_QUESTION: &str = "Could you clarify how you would like me to proceed?";

/// A recognised control tool call with its extracted argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Finish the task; the summary is the final message.
    Complete { summary: String },
    /// Suspend until the user answers.
    AskUser { question: String },
    /// Non-blocking progress note.
    SendUpdate { message: String },
}

impl ControlAction {
    /// Interpret `call` as a control action, if its name is one.
    pub fn from_call(call: &ToolCall) -> Option<Self> {
        let text = |key: &str, default: &str| {
            call.str_arg(key)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        match call.name.as_str() {
            TASK_COMPLETE => Some(Self::Complete {
                summary: text("summary", DEFAULT_SUMMARY),
            }),
            ASK_USER => Some(Self::AskUser {
                question: text("question", DEFAULT_QUESTION),
            }),
            SEND_UPDATE => Some(Self::SendUpdate {
                message: text("message", ""),
            }),
            _ => None,
        }
    }
}

pub fn is_control_tool(name: &str) -> bool {
    matches!(name, TASK_COMPLETE | ASK_USER | SEND_UPDATE)
}

/// The three control tool definitions, in catalogue order.
pub fn control_tools() -> ToolSet {
    let mut set = ToolSet::new();
    set.register_definition(ToolDefinition {
        name: TASK_COMPLETE.into(),
        description: "Call this when the task is fully done. The summary is shown to the user as your final message.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "What was accomplished"
                }
            },
            "required": ["summary"]
        }),
    });
    set.register_definition(ToolDefinition {
        name: ASK_USER.into(),
        description: "Ask the user a question and wait for the answer. Use only when you cannot proceed without their input.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to ask"
                }
            },
            "required": ["question"]
        }),
    });
    set.register_definition(ToolDefinition {
        name: SEND_UPDATE.into(),
        description: "Send a short progress update to the user without stopping.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The progress update"
                }
            },
            "required": ["message"]
        }),
    });
    set
}
