//! Shared test helpers for loop and runner tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use taskpilot_core::error::{ChannelError, ModelError, ToolError};
use taskpilot_core::message::{ConversationId, Message};
use taskpilot_core::model::{ModelClient, ModelRequest, ModelResponse};
use taskpilot_core::task::{Metadata, Task, TaskId, TaskStatus};
use taskpilot_core::tool::{ToolCall, ToolContext, ToolOutput, ToolSet};
use tokio_util::sync::CancellationToken;

use crate::capabilities::{Capabilities, PendingResponse};
use crate::scripted::ScriptedModel;

/// Capabilities that call a scripted model directly (no retry, no timeout)
/// and record everything the loop does.
pub struct RecordingCapabilities {
    pub model: ScriptedModel,
    sent: Mutex<Vec<(String, Metadata)>>,
    /// Each snapshot with the number of messages sent before it
    updates: Mutex<Vec<(Task, usize)>>,
    answers: Mutex<VecDeque<String>>,
}

impl RecordingCapabilities {
    pub fn new(model: ScriptedModel) -> Self {
        Self {
            model,
            sent: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            answers: Mutex::new(VecDeque::new()),
        }
    }

    /// Answer the next question as soon as it is asked.
    pub fn queue_answer(&self, answer: &str) {
        self.answers.lock().unwrap().push_back(answer.to_string());
    }

    /// Contents of every message sent, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn sent_with_metadata(&self) -> Vec<(String, Metadata)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<Task> {
        self.updates.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    /// How many messages had been sent when the task first entered `status`.
    pub fn sent_before(&self, status: TaskStatus) -> Option<usize> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t.status == status)
            .map(|(_, sent)| *sent)
    }

    /// Model calls made by the loop (plan requests excluded).
    pub fn model_calls(&self) -> usize {
        self.model
            .requests()
            .iter()
            .filter(|r| !r.tools.is_empty())
            .count()
    }
}

#[async_trait]
impl Capabilities for RecordingCapabilities {
    async fn call_model(
        &self,
        _task_id: &TaskId,
        messages: Vec<Message>,
        tools: &ToolSet,
        metadata: &Metadata,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ModelError> {
        let request = ModelRequest {
            messages,
            tools: tools.definitions(),
            max_tokens: None,
            metadata: metadata.clone(),
        };
        self.model.complete(request, cancel).await
    }

    async fn execute_tool(
        &self,
        call: &ToolCall,
        tools: &ToolSet,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        tools.execute(call, ctx).await
    }

    async fn send_message(
        &self,
        _conversation_id: &ConversationId,
        content: &str,
        metadata: &Metadata,
    ) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((content.to_string(), metadata.clone()));
        Ok(())
    }

    fn emit_update(&self, task: &Task) {
        let sent = self.sent.lock().unwrap().len();
        self.updates.lock().unwrap().push((task.clone(), sent));
    }

    fn open_response_slot(&self, _task_id: &TaskId) -> PendingResponse {
        let (tx, slot) = PendingResponse::channel();
        if let Some(answer) = self.answers.lock().unwrap().pop_front() {
            let _ = tx.send(answer);
        }
        slot
    }
}
