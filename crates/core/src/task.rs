//! Task record and status machine.
//!
//! A [`Task`] is one run of the agent loop for a single request within a
//! conversation. All status changes go through [`Task::transition`], which
//! refuses illegal edges and keeps the dependent fields (`pending_question`,
//! `current_tool`, `error_message`, `ended_at`) consistent with `status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::message::ConversationId;

/// Free-form caller metadata attached to a task and forwarded to collaborators.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A task shared between its step executor and the task runner's registry.
pub type SharedTask = Arc<Mutex<Task>>;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Between steps
    Running,
    /// Waiting on the model
    Thinking,
    /// A domain tool is executing
    ToolExecuting,
    /// Suspended on a question to the user
    WaitingUser,
    /// Finished (explicitly, or by step/time ceiling)
    Completed,
    /// Stopped by the caller
    Cancelled,
    /// Model failure after retries, or an unexpected failure
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }

    /// Whether `self → next` is an allowed edge.
    ///
    /// Terminal states have no outgoing edges. Any live state may terminate.
    /// Re-entering the current state is a no-op and always allowed.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self == next || next.is_terminal() {
            return true;
        }
        match self {
            Self::Running => matches!(
                next,
                Self::Thinking | Self::ToolExecuting | Self::WaitingUser
            ),
            Self::Thinking => matches!(
                next,
                Self::Running | Self::ToolExecuting | Self::WaitingUser
            ),
            Self::ToolExecuting | Self::WaitingUser => next == Self::Running,
            Self::Completed | Self::Cancelled | Self::Error => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Thinking => "thinking",
            Self::ToolExecuting => "tool_executing",
            Self::WaitingUser => "waiting_user",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Owning conversation
    pub conversation_id: ConversationId,

    pub status: TaskStatus,

    /// The original natural-language request
    pub request: String,

    /// Human-readable progress notes, for diagnostics/UI only
    #[serde(default)]
    pub scratchpad: Vec<String>,

    /// Number of model calls made so far
    pub step_count: u32,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Set iff status is `WaitingUser`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<String>,

    /// Set iff status is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Set iff status is `ToolExecuting`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tool: Option<String>,

    /// One-shot note for the next model call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immediate_memory: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: Metadata,
}

impl Task {
    /// Create a new task in the `Running` state.
    pub fn new(
        conversation_id: ConversationId,
        request: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: TaskId::new(),
            conversation_id,
            status: TaskStatus::Running,
            request: request.into(),
            scratchpad: Vec::new(),
            step_count: 0,
            started_at: Utc::now(),
            ended_at: None,
            pending_question: None,
            error_message: None,
            current_tool: None,
            immediate_memory: None,
            metadata,
        }
    }

    /// Wrap into a [`SharedTask`].
    pub fn shared(self) -> SharedTask {
        Arc::new(Mutex::new(self))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next` if the edge is allowed. Returns whether it happened.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next != TaskStatus::WaitingUser {
            self.pending_question = None;
        }
        if next != TaskStatus::ToolExecuting {
            self.current_tool = None;
        }
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
            self.immediate_memory = None;
        }
        true
    }

    /// Enter a new step: `Thinking`, step counter incremented.
    pub fn begin_step(&mut self) -> bool {
        if !self.transition(TaskStatus::Thinking) {
            return false;
        }
        self.step_count += 1;
        true
    }

    pub fn begin_tool(&mut self, name: &str) -> bool {
        if !self.transition(TaskStatus::ToolExecuting) {
            return false;
        }
        self.current_tool = Some(name.to_string());
        true
    }

    pub fn wait_for_user(&mut self, question: &str) -> bool {
        if !self.transition(TaskStatus::WaitingUser) {
            return false;
        }
        self.pending_question = Some(question.to_string());
        true
    }

    /// Back to `Running` after a tool or an answered question.
    pub fn resume(&mut self) -> bool {
        self.transition(TaskStatus::Running)
    }

    pub fn complete(&mut self) -> bool {
        self.transition(TaskStatus::Completed)
    }

    pub fn cancel(&mut self) -> bool {
        self.transition(TaskStatus::Cancelled)
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.transition(TaskStatus::Error) {
            return false;
        }
        self.error_message = Some(message.into());
        true
    }

    /// Append a progress note.
    pub fn note(&mut self, text: impl Into<String>) {
        self.scratchpad.push(text.into());
    }

    pub fn set_immediate_memory(&mut self, content: impl Into<String>) {
        self.immediate_memory = Some(content.into());
    }

    /// Take the queued immediate memory, clearing it.
    pub fn take_immediate_memory(&mut self) -> Option<String> {
        self.immediate_memory.take()
    }

    /// Whether the dependent fields agree with `status`.
    pub fn is_consistent(&self) -> bool {
        let waiting = self.status == TaskStatus::WaitingUser;
        let errored = self.status == TaskStatus::Error;
        let tooling = self.status == TaskStatus::ToolExecuting;
        self.pending_question.is_some() == waiting
            && self.error_message.is_some() == errored
            && self.current_tool.is_some() == tooling
            && self.ended_at.is_some() == self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(ConversationId::from("conv"), "do it", Metadata::new())
    }

    #[test]
    fn new_task_is_running_and_consistent() {
        let t = task();
        assert_eq!(t.status, TaskStatus::Running);
        assert_eq!(t.step_count, 0);
        assert!(t.is_consistent());
    }

    #[test]
    fn step_cycle_follows_allowed_edges() {
        let mut t = task();
        assert!(t.begin_step());
        assert_eq!(t.status, TaskStatus::Thinking);
        assert_eq!(t.step_count, 1);
        assert!(t.begin_tool("shell"));
        assert_eq!(t.current_tool.as_deref(), Some("shell"));
        assert!(t.is_consistent());
        assert!(t.resume());
        assert!(t.current_tool.is_none());
        assert!(t.is_consistent());
    }

    #[test]
    fn waiting_user_sets_and_clears_question() {
        let mut t = task();
        t.begin_step();
        assert!(t.wait_for_user("Which file?"));
        assert_eq!(t.pending_question.as_deref(), Some("Which file?"));
        assert!(t.is_consistent());
        assert!(t.resume());
        assert!(t.pending_question.is_none());
        assert!(t.is_consistent());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut t = task();
        assert!(t.cancel());
        assert!(t.ended_at.is_some());
        assert!(!t.begin_step());
        assert!(!t.complete());
        assert!(!t.fail("late"));
        assert!(!t.resume());
        assert_eq!(t.status, TaskStatus::Cancelled);
        assert!(t.error_message.is_none());
        assert!(t.is_consistent());
    }

    #[test]
    fn fail_records_message() {
        let mut t = task();
        t.begin_step();
        assert!(t.fail("provider down"));
        assert_eq!(t.status, TaskStatus::Error);
        assert_eq!(t.error_message.as_deref(), Some("provider down"));
        assert!(t.is_consistent());
    }

    #[test]
    fn disallowed_edges_are_rejected() {
        let mut t = task();
        t.begin_step();
        t.begin_tool("shell");
        assert!(!t.transition(TaskStatus::Thinking));
        assert!(!t.transition(TaskStatus::WaitingUser));
        assert_eq!(t.status, TaskStatus::ToolExecuting);
    }

    #[test]
    fn immediate_memory_is_one_shot() {
        let mut t = task();
        t.set_immediate_memory("port is 8080");
        assert_eq!(t.take_immediate_memory().as_deref(), Some("port is 8080"));
        assert!(t.take_immediate_memory().is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::WaitingUser).unwrap();
        assert_eq!(json, r#""waiting_user""#);
        assert_eq!(TaskStatus::ToolExecuting.to_string(), "tool_executing");
    }
}
