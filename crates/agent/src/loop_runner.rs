//! The step executor: drives one task until it terminates or suspends.
//!
//! Each iteration: check cancellation and the time budget, call the model,
//! then act on what it returned (control tools, domain tools, or plain text).
//! Tool failures are fed back to the model; only model failures after retries
//! and explicit completion end the run (plus cancellation and the budgets).

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use taskpilot_config::AgentConfig;
use taskpilot_core::message::{ConversationId, Transcript};
use taskpilot_core::task::{Metadata, SharedTask, Task, TaskId, TaskStatus};
use taskpilot_core::tool::{ToolCall, ToolContext, ToolOutput, ToolSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capabilities::Capabilities;
use crate::control::ControlAction;
use crate::prompt;

/// Longest tool output echoed into a tool call record.
const MAX_RECORD_OUTPUT: usize = 500;

/// Budgets for a single run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_steps: u32,
    pub step_delay: Duration,
    /// `None` = unlimited
    pub max_duration: Option<Duration>,
    /// Render tool call records into outgoing messages
    pub show_tool_records: bool,
}

impl LoopConfig {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            step_delay: Duration::from_millis(config.step_delay_ms),
            max_duration: (config.max_duration_ms > 0)
                .then(|| Duration::from_millis(config.max_duration_ms)),
            show_tool_records: config.show_tool_records,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// How a step's tool calls ended.
enum StepOutcome {
    Continue,
    Finished,
}

/// The agent loop for one task.
pub struct AgentLoop {
    config: LoopConfig,
    capabilities: Arc<dyn Capabilities>,
    started: Option<Instant>,
}

impl AgentLoop {
    pub fn new(config: LoopConfig, capabilities: Arc<dyn Capabilities>) -> Self {
        Self {
            config,
            capabilities,
            started: None,
        }
    }

    /// Count the time budget from `started` (the task's start) instead of
    /// from the first step.
    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = Some(started);
        self
    }

    /// Run `task` to a terminal state (or until stopped from outside).
    ///
    /// The task is mutated in place; the final transcript is returned for
    /// inspection.
    pub async fn run(
        &self,
        task: &SharedTask,
        mut transcript: Transcript,
        tools: &ToolSet,
        metadata: &Metadata,
        cancel: &CancellationToken,
    ) -> Transcript {
        let started = self.started.unwrap_or_else(Instant::now);
        let (task_id, conversation_id) = {
            let t = lock(task);
            (t.id.clone(), t.conversation_id.clone())
        };
        let run = RunContext {
            task,
            task_id,
            conversation_id,
            metadata,
            cancel,
        };

        info!(task_id = %run.task_id, max_steps = self.config.max_steps, "Agent loop started");

        loop {
            let step_count = lock(task).step_count;
            if step_count >= self.config.max_steps {
                break;
            }

            // 1. cancellation
            if cancel.is_cancelled() {
                self.finish_cancelled(&run);
                return transcript;
            }

            // 2. wall-clock budget
            if let Some(max) = self.config.max_duration
                && started.elapsed() >= max
            {
                info!(task_id = %run.task_id, elapsed_ms = started.elapsed().as_millis() as u64, "Time limit reached");
                self.send(&run, prompt::TIME_LIMIT_MESSAGE, "limit").await;
                self.update(task, |t| t.complete());
                return transcript;
            }

            // 3. enter the step
            let mut memory = None;
            if !self.update(task, |t| {
                memory = t.take_immediate_memory();
                t.begin_step()
            }) {
                return transcript;
            }
            let step = step_count + 1;
            debug!(task_id = %run.task_id, step, "Agent loop step");

            // 4. one-shot memory, never stored in the transcript
            let messages = match memory {
                Some(note) => transcript.with_ephemeral_system(&prompt::immediate_memory_note(&note)),
                None => transcript.messages().to_vec(),
            };

            // 5. model call
            let response = self
                .capabilities
                .call_model(&run.task_id, messages, tools, metadata, cancel)
                .await;
            if cancel.is_cancelled() {
                self.finish_cancelled(&run);
                return transcript;
            }
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(task_id = %run.task_id, step, error = %e, "Model call failed");
                    self.update(task, |t| t.fail(e.to_string()));
                    self.send(&run, &prompt::model_failure_message(&e.to_string()), "error")
                        .await;
                    return transcript;
                }
            };

            if response.has_tool_calls() {
                // 6. tool calls
                let outcome = self
                    .process_tool_calls(&run, &mut transcript, tools, &response.text, &response.tool_calls)
                    .await;
                if let StepOutcome::Finished = outcome {
                    return transcript;
                }
            } else if !response.text.trim().is_empty() {
                // 7. plain text does not end the task
                self.send(&run, &response.text, "step").await;
                transcript.push_assistant(response.text);
            } else {
                // 8. nothing at all
                warn!(task_id = %run.task_id, step, "Empty model response, nudging");
                transcript.push_system(prompt::EMPTY_RESPONSE_NUDGE);
            }

            self.update(task, |t| t.status != TaskStatus::Running && t.resume());

            // 9. courtesy delay
            tokio::time::sleep(self.config.step_delay).await;
        }

        if cancel.is_cancelled() {
            self.finish_cancelled(&run);
            return transcript;
        }
        info!(task_id = %run.task_id, max_steps = self.config.max_steps, "Step limit reached");
        self.send(&run, prompt::STEP_LIMIT_MESSAGE, "limit").await;
        self.update(task, |t| t.complete());
        transcript
    }

    async fn process_tool_calls(
        &self,
        run: &RunContext<'_>,
        transcript: &mut Transcript,
        tools: &ToolSet,
        text: &str,
        calls: &[taskpilot_core::message::MessageToolCall],
    ) -> StepOutcome {
        transcript.push_assistant_tool_calls(text, calls.to_vec());

        let mut outgoing: Vec<String> = Vec::new();
        if !text.trim().is_empty() {
            outgoing.push(text.trim().to_string());
        }
        // Question/answer turns go after all tool results of the step.
        let mut answered: Vec<(String, String)> = Vec::new();

        for raw in calls {
            if run.cancel.is_cancelled() {
                self.finish_cancelled(run);
                return StepOutcome::Finished;
            }
            let call = ToolCall::from_message(raw);

            match ControlAction::from_call(&call) {
                Some(ControlAction::Complete { summary }) => {
                    transcript.push_tool_result(&call.id, &call.name, "Task marked as complete.");
                    lock(run.task).note(format!("Completed: {summary}"));
                    self.send(run, &summary, "final").await;
                    self.update(run.task, |t| t.complete());
                    info!(task_id = %run.task_id, "Task completed");
                    return StepOutcome::Finished;
                }
                Some(ControlAction::AskUser { question }) => {
                    transcript.push_tool_result(
                        &call.id,
                        &call.name,
                        "Question delivered to the user. Their answer follows.",
                    );
                    self.flush(run, &mut outgoing).await;

                    // Open the slot first so an immediate answer is kept.
                    let slot = self.capabilities.open_response_slot(&run.task_id);
                    if run.cancel.is_cancelled() {
                        self.finish_cancelled(run);
                        return StepOutcome::Finished;
                    }
                    self.send(run, &question, "question").await;
                    if !self.update(run.task, |t| t.wait_for_user(&question)) {
                        return StepOutcome::Finished;
                    }
                    lock(run.task).note(format!("Asked: {question}"));

                    info!(task_id = %run.task_id, "Waiting for user answer");
                    let answer = slot.wait(run.cancel).await;
                    if run.cancel.is_cancelled() || lock(run.task).is_terminal() {
                        self.finish_cancelled(run);
                        return StepOutcome::Finished;
                    }
                    self.update(run.task, |t| t.resume());
                    answered.push((question, answer));
                }
                Some(ControlAction::SendUpdate { message }) => {
                    if !message.is_empty() {
                        self.send(run, &message, "update").await;
                    }
                    transcript.push_tool_result(&call.id, &call.name, "Update sent.");
                }
                None => {
                    let (content, success) = self.run_domain_tool(run, tools, &call).await;
                    if self.config.show_tool_records {
                        outgoing.push(render_tool_record(&call.name, &call.arguments, &content, success));
                    }
                    transcript.push_tool_result(&call.id, &call.name, content);
                    self.update(run.task, |t| t.resume());
                }
            }
        }

        for (question, answer) in answered {
            transcript.push_assistant(question);
            transcript.push_user(answer);
        }
        self.flush(run, &mut outgoing).await;
        StepOutcome::Continue
    }

    /// Execute a domain tool. Returns the transcript content and success flag.
    async fn run_domain_tool(
        &self,
        run: &RunContext<'_>,
        tools: &ToolSet,
        call: &ToolCall,
    ) -> (String, bool) {
        self.update(run.task, |t| t.begin_tool(&call.name));
        let ctx = ToolContext {
            task_id: run.task_id.clone(),
            conversation_id: run.conversation_id.clone(),
            cancel: run.cancel.clone(),
        };

        match self.capabilities.execute_tool(call, tools, &ctx).await {
            Ok(ToolOutput::ImmediateMemory(note)) => {
                lock(run.task).set_immediate_memory(note);
                ("Noted. It will be shown to you on your next step.".to_string(), true)
            }
            Ok(ToolOutput::Result(result)) => {
                debug!(task_id = %run.task_id, tool = %call.name, success = result.success, "Tool finished");
                (result.output, result.success)
            }
            Err(e) => {
                warn!(task_id = %run.task_id, tool = %call.name, error = %e, "Tool failed");
                (e.to_structured().to_string(), false)
            }
        }
    }

    fn finish_cancelled(&self, run: &RunContext<'_>) {
        if self.update(run.task, |t| t.cancel()) {
            info!(task_id = %run.task_id, "Task cancelled");
        }
    }

    /// Apply `f` under the lock; emit a snapshot if it reports a change.
    fn update(&self, task: &SharedTask, f: impl FnOnce(&mut Task) -> bool) -> bool {
        let snapshot = {
            let mut t = lock(task);
            if !f(&mut t) {
                return false;
            }
            t.clone()
        };
        self.capabilities.emit_update(&snapshot);
        true
    }

    async fn send(&self, run: &RunContext<'_>, content: &str, kind: &str) {
        let metadata = message_metadata(run.metadata, &run.task_id, kind);
        if let Err(e) = self
            .capabilities
            .send_message(&run.conversation_id, content, &metadata)
            .await
        {
            warn!(task_id = %run.task_id, error = %e, "Failed to send message");
        }
    }

    async fn flush(&self, run: &RunContext<'_>, outgoing: &mut Vec<String>) {
        if outgoing.is_empty() {
            return;
        }
        let content = outgoing.join("\n\n");
        outgoing.clear();
        self.send(run, &content, "step").await;
    }
}

struct RunContext<'a> {
    task: &'a SharedTask,
    task_id: TaskId,
    conversation_id: ConversationId,
    metadata: &'a Metadata,
    cancel: &'a CancellationToken,
}

fn lock(task: &SharedTask) -> std::sync::MutexGuard<'_, Task> {
    task.lock().unwrap_or_else(|e| e.into_inner())
}

/// Caller metadata plus `task_id` and the message `kind`.
fn message_metadata(base: &Metadata, task_id: &TaskId, kind: &str) -> Metadata {
    let mut metadata = base.clone();
    metadata.insert("task_id".into(), Value::String(task_id.to_string()));
    metadata.insert("kind".into(), Value::String(kind.to_string()));
    metadata
}

/// Human-readable record of one tool call.
pub fn render_tool_record(name: &str, arguments: &Value, output: &str, success: bool) -> String {
    let status = if success { "ok" } else { "failed" };
    let mut shown: String = output.chars().take(MAX_RECORD_OUTPUT).collect();
    if shown.len() < output.len() {
        shown.push_str("...");
    }
    format!("[{name}] {arguments} -> {status}\n{shown}")
}
