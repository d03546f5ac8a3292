//! Built-in tool implementations for TaskPilot.
//!
//! Two groups, offered to the model in this order after the control tools:
//!
//! - **context tools**: `remember_for_next_step` (immediate memory) and
//!   `conversation_history` (explicit retrieval of earlier turns)
//! - **domain tools**: `shell`, `file_read`, `file_write`

pub mod file_read;
pub mod file_write;
pub mod history;
pub mod remember;
pub mod shell;

use std::sync::Arc;
use taskpilot_core::channel::HistorySource;
use taskpilot_core::tool::ToolSet;

pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use history::ConversationHistoryTool;
pub use remember::RememberTool;
pub use shell::ShellTool;

/// Memory and history tools. History is only offered when a source exists.
pub fn context_tools(history: Option<Arc<dyn HistorySource>>) -> ToolSet {
    let mut set = ToolSet::new();
    set.register(Arc::new(RememberTool));
    if let Some(source) = history {
        set.register(Arc::new(ConversationHistoryTool::new(source)));
    }
    set
}

/// Create the default domain tool set.
///
/// Shell: only common read-mostly commands (ls, cat, echo, git, pwd, etc.)
pub fn default_domain_tools() -> ToolSet {
    let mut set = ToolSet::new();
    let safe_commands = [
        "ls", "dir", "cat", "head", "tail", "echo", "pwd", "date", "whoami", "wc", "grep",
        "find", "which", "git", "cargo", "rustc",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    set.register(Arc::new(ShellTool::new(safe_commands)));
    set.register(Arc::new(FileReadTool::new()));
    set.register(Arc::new(FileWriteTool::new()));
    set
}
