//! Capabilities injected into the step executor.
//!
//! The loop never talks to a provider, a tool, a conversation or an observer
//! directly. It goes through [`Capabilities`], which the task runner wires to
//! concrete collaborators and the retry/timeout envelope.

use async_trait::async_trait;
use taskpilot_core::error::{ChannelError, ModelError, ToolError};
use taskpilot_core::message::{ConversationId, Message};
use taskpilot_core::model::ModelResponse;
use taskpilot_core::task::{Metadata, Task, TaskId};
use taskpilot_core::tool::{ToolCall, ToolContext, ToolOutput, ToolSet};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Capabilities: Send + Sync {
    /// Call the model with the transcript and tool catalogue (retries included).
    async fn call_model(
        &self,
        task_id: &TaskId,
        messages: Vec<Message>,
        tools: &ToolSet,
        metadata: &Metadata,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ModelError>;

    /// Execute a domain tool (timeout included).
    async fn execute_tool(
        &self,
        call: &ToolCall,
        tools: &ToolSet,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    /// Persist and broadcast a message to the conversation.
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        metadata: &Metadata,
    ) -> Result<(), ChannelError>;

    /// Fire-and-forget status broadcast.
    fn emit_update(&self, task: &Task);

    /// Open the task's pending-response slot before asking the user.
    fn open_response_slot(&self, task_id: &TaskId) -> PendingResponse;
}

/// The receiving half of a task's pending-response slot.
///
/// Resolves exactly once: with the user's answer, or with an empty answer if
/// the task is stopped or the sending half is dropped.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<String>,
}

impl PendingResponse {
    /// A fresh slot: the sender goes to whoever will answer.
    pub fn channel() -> (oneshot::Sender<String>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    pub async fn wait(self, cancel: &CancellationToken) -> String {
        tokio::select! {
            biased;
            answer = self.rx => answer.unwrap_or_default(),
            _ = cancel.cancelled() => String::new(),
        }
    }
}
