//! Task runner: owns task lifecycles and wires the loop to collaborators.
//!
//! The runner keeps three registries keyed by task id (task records,
//! cancellation tokens, pending-response slots), each behind its own mutex.
//! Each task's loop runs as its own Tokio task; a panic inside it is caught
//! at the boundary and turned into an `error` status.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use taskpilot_config::AppConfig;
use taskpilot_core::channel::MessageSink;
use taskpilot_core::error::{ChannelError, ModelError, TaskError, ToolError};
use taskpilot_core::event::{DomainEvent, EventBus};
use taskpilot_core::message::{ConversationId, Message, Transcript};
use taskpilot_core::model::{ModelClient, ModelRequest, ModelResponse};
use taskpilot_core::task::{Metadata, SharedTask, Task, TaskId};
use taskpilot_core::tool::{ToolCall, ToolContext, ToolOutput, ToolSet};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capabilities::{Capabilities, PendingResponse};
use crate::control::{control_tools, is_control_tool};
use crate::loop_runner::{AgentLoop, LoopConfig};
use crate::persona::{default_persona, PersonaResolver, StaticPersona};
use crate::prompt;
use crate::retry::{call_model_once, execute_tool_with_timeout, with_retry, RetryPolicy};

/// Longest message preview carried in `MessageSent` events.
const PREVIEW_CHARS: usize = 120;

#[derive(Default)]
struct Registry {
    tasks: Mutex<HashMap<TaskId, SharedTask>>,
    tokens: Mutex<HashMap<TaskId, CancellationToken>>,
    slots: Mutex<HashMap<TaskId, oneshot::Sender<String>>>,
}

impl Registry {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, SharedTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<TaskId, oneshot::Sender<String>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn task(&self, task_id: &TaskId) -> Option<SharedTask> {
        self.tasks().get(task_id).cloned()
    }

    fn remove(&self, task_id: &TaskId) {
        self.tasks().remove(task_id);
        self.tokens().remove(task_id);
        self.slots().remove(task_id);
    }
}

fn lock(task: &SharedTask) -> MutexGuard<'_, Task> {
    task.lock().unwrap_or_else(|e| e.into_inner())
}

/// Starts, stops, answers and reports on tasks.
///
/// Cheap to clone; clones share the same registries.
#[derive(Clone)]
pub struct TaskRunner {
    model: Arc<dyn ModelClient>,
    sink: Arc<dyn MessageSink>,
    persona: Arc<dyn PersonaResolver>,
    tools: Arc<ToolSet>,
    events: Arc<EventBus>,
    config: Arc<AppConfig>,
    registry: Arc<Registry>,
}

impl TaskRunner {
    /// A runner offering only the control tools, with the configured persona.
    pub fn new(model: Arc<dyn ModelClient>, sink: Arc<dyn MessageSink>, config: AppConfig) -> Self {
        Self {
            model,
            sink,
            persona: Arc::new(StaticPersona::from_config(&config.persona)),
            tools: Arc::new(control_tools()),
            events: Arc::new(EventBus::default()),
            config: Arc::new(config),
            registry: Arc::new(Registry::default()),
        }
    }

    /// Offer `tools` after the control tools (context tools first, then domain tools).
    ///
    /// Tools named like a control tool are dropped; control names are reserved.
    pub fn with_tools(mut self, mut tools: ToolSet) -> Self {
        tools.retain(|name| {
            let reserved = is_control_tool(name);
            if reserved {
                warn!(tool = name, "Ignoring tool that shadows a control tool");
            }
            !reserved
        });
        self.tools = Arc::new(control_tools().merge(&tools));
        self
    }

    pub fn with_persona(mut self, persona: Arc<dyn PersonaResolver>) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// The bus carrying task updates and other domain events.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// The full catalogue offered to the model, in order.
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Start a task for `message` in `conversation_id` and return immediately.
    ///
    /// Must be called from within a Tokio runtime. Fails if the conversation
    /// already has an active task.
    pub fn start(
        &self,
        conversation_id: ConversationId,
        message: impl Into<String>,
        metadata: Metadata,
    ) -> Result<TaskId, TaskError> {
        let message = message.into();
        let task = Task::new(conversation_id.clone(), message.clone(), metadata.clone());
        let task_id = task.id.clone();
        let snapshot = task.clone();
        let shared = task.shared();
        let cancel = CancellationToken::new();
        let started = Instant::now();

        {
            let mut tasks = self.registry.tasks();
            if let Some(active) = tasks.values().find(|t| {
                let t = lock(t);
                t.conversation_id == conversation_id && !t.is_terminal()
            }) {
                return Err(TaskError::ConversationBusy {
                    conversation_id: conversation_id.to_string(),
                    task_id: lock(active).id.to_string(),
                });
            }
            tasks.insert(task_id.clone(), shared.clone());
        }
        self.registry.tokens().insert(task_id.clone(), cancel.clone());

        info!(task_id = %task_id, conversation_id = %conversation_id, "Task started");
        self.emit(&snapshot);

        let runner = self.clone();
        tokio::spawn(async move {
            runner.drive(shared, cancel, started, message, metadata).await;
        });

        Ok(task_id)
    }

    /// Stop a task. Its status is `cancelled` by the time this returns.
    pub fn stop(&self, task_id: &TaskId) -> Result<(), TaskError> {
        let task = self
            .registry
            .task(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        if let Some(token) = self.registry.tokens().get(task_id) {
            token.cancel();
        }

        let snapshot = {
            let mut t = lock(&task);
            t.cancel().then(|| t.clone())
        };
        if let Some(snapshot) = snapshot {
            info!(task_id = %task_id, "Task stopped");
            self.emit(&snapshot);
        }

        if let Some(slot) = self.registry.slots().remove(task_id) {
            let _ = slot.send(String::new());
        }
        Ok(())
    }

    /// Answer a task's pending question. Returns whether a slot was open.
    pub fn respond(&self, task_id: &TaskId, answer: impl Into<String>) -> bool {
        let Some(slot) = self.registry.slots().remove(task_id) else {
            warn!(task_id = %task_id, "Response ignored: task is not waiting for an answer");
            return false;
        };
        info!(task_id = %task_id, "User answered");
        if slot.send(answer.into()).is_err() {
            debug!(task_id = %task_id, "Answer arrived after the task stopped waiting");
        }
        true
    }

    /// Snapshot of a tracked task.
    pub fn get(&self, task_id: &TaskId) -> Option<Task> {
        self.registry.task(task_id).map(|t| lock(&t).clone())
    }

    /// The non-terminal task of a conversation, if any.
    pub fn active_task_for(&self, conversation_id: &ConversationId) -> Option<Task> {
        self.registry
            .tasks()
            .values()
            .map(|t| lock(t).clone())
            .find(|t| &t.conversation_id == conversation_id && !t.is_terminal())
    }

    pub fn has_active(&self, conversation_id: &ConversationId) -> bool {
        self.active_task_for(conversation_id).is_some()
    }

    /// Snapshots of every tracked task, oldest first.
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .registry
            .tasks()
            .values()
            .map(|t| lock(t).clone())
            .collect();
        tasks.sort_by_key(|t| t.started_at);
        tasks
    }

    /// Stop every tracked task. Returns how many were still active.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<TaskId> = self.registry.tasks().keys().cloned().collect();
        let mut stopped = 0;
        for id in ids {
            let active = self.get(&id).is_some_and(|t| !t.is_terminal());
            if self.stop(&id).is_ok() && active {
                stopped += 1;
            }
        }
        info!(stopped, "Task runner shut down");
        stopped
    }

    fn emit(&self, task: &Task) {
        self.events.publish(DomainEvent::TaskUpdated { task: task.clone() });
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.retry)
    }

    fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.config.agent.model_timeout_secs)
    }

    /// Run the task to completion, then schedule its removal.
    async fn drive(
        self,
        task: SharedTask,
        cancel: CancellationToken,
        started: Instant,
        request: String,
        metadata: Metadata,
    ) {
        let task_id = lock(&task).id.clone();

        let outcome = AssertUnwindSafe(self.execute(&task, &cancel, started, &request, &metadata))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(()) => None,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(task_id = %task_id, reason = %reason, "Task panicked");
                Some(format!("Unexpected failure: {reason}"))
            }
        };

        let snapshot = {
            let mut t = lock(&task);
            let changed = match failure {
                Some(reason) => t.fail(reason),
                None if !t.is_terminal() => t.fail("Agent loop exited without finishing"),
                None => false,
            };
            changed.then(|| t.clone())
        };
        if let Some(snapshot) = snapshot {
            self.emit(&snapshot);
        }

        self.registry.slots().remove(&task_id);

        let retention = Duration::from_secs(self.config.tasks.retention_secs);
        tokio::time::sleep(retention).await;
        self.registry.remove(&task_id);
        debug!(task_id = %task_id, "Task record discarded");
    }

    /// Persona, plan, then the loop. The time budget runs from `started`.
    async fn execute(
        &self,
        task: &SharedTask,
        cancel: &CancellationToken,
        started: Instant,
        request: &str,
        metadata: &Metadata,
    ) {
        let task_id = lock(task).id.clone();

        let persona = self.resolve_persona(&task_id, metadata, cancel).await;
        if self.config.plan.enabled && !cancel.is_cancelled() {
            self.send_plan(task, &persona, request, metadata, cancel).await;
        }

        let transcript = Transcript::seeded(prompt::build_system_prompt(&persona), request);
        let capabilities = Arc::new(RunnerCapabilities {
            runner: self.clone(),
        });
        AgentLoop::new(LoopConfig::from_config(&self.config.agent), capabilities)
            .started_at(started)
            .run(task, transcript, &self.tools, metadata, cancel)
            .await;
    }

    /// Persona text, retried; falls back to the default persona.
    async fn resolve_persona(&self, task_id: &TaskId, metadata: &Metadata, cancel: &CancellationToken) -> String {
        let result = with_retry(
            &self.retry_policy(),
            cancel,
            |_| self.persona.system_prompt(metadata),
            |attempt, delay, e| self.publish_retry(task_id, attempt, delay, &e.to_string()),
        )
        .await;

        match result {
            Ok(persona) => persona,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Persona resolution failed, using default persona");
                default_persona(&self.config.persona.name)
            }
        }
    }

    /// Short acknowledgement sent before the first step. Failure is not fatal.
    async fn send_plan(
        &self,
        task: &SharedTask,
        persona: &str,
        request: &str,
        metadata: &Metadata,
        cancel: &CancellationToken,
    ) {
        let (task_id, conversation_id) = {
            let t = lock(task);
            (t.id.clone(), t.conversation_id.clone())
        };
        let plan_request = ModelRequest {
            messages: prompt::plan_messages(persona, request),
            tools: Vec::new(),
            max_tokens: Some(self.config.plan.max_tokens),
            metadata: metadata.clone(),
        };
        let policy = self
            .retry_policy()
            .with_max_retries(self.config.plan.max_attempts.saturating_sub(1));
        let timeout = self.model_timeout();

        let result = with_retry(
            &policy,
            cancel,
            |_| call_model_once(self.model.as_ref(), plan_request.clone(), timeout, cancel),
            |_, _, _| {},
        )
        .await;

        match result {
            Ok(response) if !response.text.trim().is_empty() => {
                let mut message_metadata = metadata.clone();
                message_metadata.insert("task_id".into(), task_id.to_string().into());
                message_metadata.insert("kind".into(), "plan".into());
                let text = response.text.trim();
                lock(task).note(format!("Plan: {text}"));
                if let Err(e) = self.deliver(&task_id, &conversation_id, text, &message_metadata).await {
                    warn!(task_id = %task_id, error = %e, "Failed to send plan message");
                }
            }
            Ok(_) => debug!(task_id = %task_id, "Plan acknowledgement was empty, skipped"),
            Err(e) => warn!(task_id = %task_id, error = %e, "Plan acknowledgement skipped"),
        }
    }

    async fn deliver(
        &self,
        task_id: &TaskId,
        conversation_id: &ConversationId,
        content: &str,
        metadata: &Metadata,
    ) -> Result<(), ChannelError> {
        self.sink.send(conversation_id, content, metadata).await?;
        self.events.publish(DomainEvent::MessageSent {
            task_id: task_id.to_string(),
            conversation_id: conversation_id.to_string(),
            content_preview: content.chars().take(PREVIEW_CHARS).collect(),
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    fn publish_retry(&self, task_id: &TaskId, attempt: u32, delay: Duration, error_message: &str) {
        self.events.publish(DomainEvent::ModelRetry {
            task_id: task_id.to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            error_message: error_message.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The runner's collaborators behind the loop's capability interface.
struct RunnerCapabilities {
    runner: TaskRunner,
}

#[async_trait]
impl Capabilities for RunnerCapabilities {
    async fn call_model(
        &self,
        task_id: &TaskId,
        messages: Vec<Message>,
        tools: &ToolSet,
        metadata: &Metadata,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ModelError> {
        let runner = &self.runner;
        let request = ModelRequest {
            messages,
            tools: tools.definitions(),
            max_tokens: None,
            metadata: metadata.clone(),
        };
        let timeout = runner.model_timeout();

        with_retry(
            &runner.retry_policy(),
            cancel,
            |_| call_model_once(runner.model.as_ref(), request.clone(), timeout, cancel),
            |attempt, delay, e| runner.publish_retry(task_id, attempt, delay, &e.to_string()),
        )
        .await
    }

    async fn execute_tool(
        &self,
        call: &ToolCall,
        tools: &ToolSet,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let timeout = Duration::from_secs(self.runner.config.agent.tool_timeout_secs);
        let started = Instant::now();
        let result = execute_tool_with_timeout(tools, call, ctx, timeout).await;

        let success = match &result {
            Ok(ToolOutput::Result(r)) => r.success,
            Ok(ToolOutput::ImmediateMemory(_)) => true,
            Err(_) => false,
        };
        self.runner.events.publish(DomainEvent::ToolExecuted {
            task_id: ctx.task_id.to_string(),
            tool_name: call.name.clone(),
            success,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });
        result
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        metadata: &Metadata,
    ) -> Result<(), ChannelError> {
        let task_id = metadata
            .get("task_id")
            .and_then(|v| v.as_str())
            .map(TaskId::from)
            .unwrap_or_default();
        self.runner
            .deliver(&task_id, conversation_id, content, metadata)
            .await
    }

    fn emit_update(&self, task: &Task) {
        self.runner.emit(task);
    }

    fn open_response_slot(&self, task_id: &TaskId) -> PendingResponse {
        let (tx, slot) = PendingResponse::channel();
        self.runner.registry.slots().insert(task_id.clone(), tx);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ASK_USER, TASK_COMPLETE};
    use crate::scripted::{Script, ScriptStep, ScriptedError, ScriptedModel, ScriptedResponse};
    use taskpilot_core::channel::MessageLog;
    use taskpilot_core::error::Error;
    use taskpilot_core::message::Role;
    use taskpilot_core::task::TaskStatus;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.agent.step_delay_ms = 10;
        config.retry.base_delay_ms = 100;
        config.retry.jitter_factor = 0.0;
        config.tasks.retention_secs = 60;
        config
    }

    fn runner_with(steps: Vec<ScriptStep>) -> (TaskRunner, Arc<MessageLog>) {
        runner_with_model(Arc::new(ScriptedModel::from_steps(steps)), test_config())
    }

    fn runner_with_model(model: Arc<dyn ModelClient>, config: AppConfig) -> (TaskRunner, Arc<MessageLog>) {
        let log = Arc::new(MessageLog::new());
        (TaskRunner::new(model, log.clone(), config), log)
    }

    fn complete(summary: &str) -> ScriptStep {
        ScriptStep::call(TASK_COMPLETE, serde_json::json!({ "summary": summary }))
    }

    fn conv() -> ConversationId {
        ConversationId::from("conv-1")
    }

    fn contents(log: &MessageLog) -> Vec<String> {
        log.messages(&conv()).into_iter().map(|m| m.content).collect()
    }

    async fn wait_until(runner: &TaskRunner, id: &TaskId, pred: impl Fn(&Task) -> bool) -> Task {
        for _ in 0..10_000 {
            if let Some(task) = runner.get(id)
                && pred(&task)
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached for task {id}");
    }

    async fn wait_terminal(runner: &TaskRunner, id: &TaskId) -> Task {
        wait_until(runner, id, |t| t.is_terminal()).await
    }

    #[tokio::test(start_paused = true)]
    async fn completes_with_plan_then_summary() {
        let (runner, log) = runner_with(vec![complete("Report written")]);
        let id = runner.start(conv(), "write a report", Metadata::new()).unwrap();

        let task = wait_terminal(&runner, &id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(contents(&log), vec!["On it.", "Report written"]);
        assert!(log
            .messages(&conv())
            .iter()
            .all(|m| m.role == Role::Assistant));
    }

    struct Impostor;

    #[async_trait]
    impl taskpilot_core::tool::Tool for Impostor {
        fn name(&self) -> &str {
            ASK_USER
        }

        fn description(&self) -> &str {
            "Not the real ask_user"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }

        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(taskpilot_core::tool::ToolResult::ok("impostor").into())
        }
    }

    #[tokio::test]
    async fn caller_tools_cannot_shadow_control_tools() {
        let mut given = ToolSet::new();
        given.register(Arc::new(Impostor));
        let (runner, _) = runner_with(Vec::new());
        let runner = runner.with_tools(given);

        assert_eq!(runner.tools().names(), control_tools().names());
        assert!(runner.tools().get(ASK_USER).is_none());
        assert_eq!(runner.tools().definitions(), control_tools().definitions());
    }

    #[tokio::test(start_paused = true)]
    async fn second_task_in_busy_conversation_is_rejected() {
        let (runner, _) = runner_with(vec![
            ScriptStep::call(ASK_USER, serde_json::json!({ "question": "Which file?" })),
            complete("done"),
        ]);
        let id = runner.start(conv(), "first", Metadata::new()).unwrap();

        let err = runner.start(conv(), "second", Metadata::new()).unwrap_err();
        assert!(matches!(err, TaskError::ConversationBusy { .. }));
        assert!(runner
            .start(ConversationId::from("other"), "elsewhere", Metadata::new())
            .is_ok());

        runner.stop(&id).unwrap();
        assert!(!runner.has_active(&conv()));
    }

    #[tokio::test(start_paused = true)]
    async fn ask_user_then_respond() {
        let (runner, log) = runner_with(vec![
            ScriptStep::call(ASK_USER, serde_json::json!({ "question": "Which file?" })),
            complete("Edited main.ts"),
        ]);
        let id = runner.start(conv(), "edit the file", Metadata::new()).unwrap();

        let waiting = wait_until(&runner, &id, |t| t.status == TaskStatus::WaitingUser).await;
        assert_eq!(waiting.pending_question.as_deref(), Some("Which file?"));
        assert!(contents(&log).contains(&"Which file?".to_string()));
        assert_eq!(runner.active_task_for(&conv()).map(|t| t.id), Some(id.clone()));

        assert!(runner.respond(&id, "main.ts"));
        assert!(!runner.respond(&id, "again"), "second respond is a no-op");

        let task = wait_terminal(&runner, &id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(contents(&log).last().map(String::as_str), Some("Edited main.ts"));
    }

    #[tokio::test(start_paused = true)]
    async fn respond_without_open_slot_is_noop() {
        let (runner, _) = runner_with(vec![complete("done")]);
        let id = runner.start(conv(), "quick", Metadata::new()).unwrap();
        wait_terminal(&runner, &id).await;
        assert!(!runner.respond(&id, "late"));
        assert!(!runner.respond(&TaskId::from("missing"), "x"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_waiting_unblocks_and_cancels() {
        let model = Arc::new(ScriptedModel::from_steps(vec![
            ScriptStep::call(ASK_USER, serde_json::json!({ "question": "Continue?" })),
            complete("never"),
        ]));
        let (runner, log) = runner_with_model(model.clone(), test_config());
        let id = runner.start(conv(), "risky", Metadata::new()).unwrap();
        wait_until(&runner, &id, |t| t.status == TaskStatus::WaitingUser).await;

        runner.stop(&id).unwrap();
        let task = runner.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.pending_question.is_none());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(model.remaining(), 1, "no model call after stop");
        assert!(!contents(&log).contains(&"never".to_string()));
        assert!(!runner.respond(&id, "yes"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_slow_model_call_is_immediate() {
        let model = Arc::new(ScriptedModel::new(Script {
            plan: None,
            responses: vec![ScriptedResponse {
                delay_ms: 3_600_000,
                step: complete("too late"),
            }],
        }));
        let (runner, log) = runner_with_model(model, test_config());
        let id = runner.start(conv(), "slow", Metadata::new()).unwrap();
        wait_until(&runner, &id, |t| t.status == TaskStatus::Thinking).await;

        runner.stop(&id).unwrap();
        assert_eq!(runner.get(&id).unwrap().status, TaskStatus::Cancelled);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.get(&id).unwrap().status, TaskStatus::Cancelled);
        assert!(!contents(&log).contains(&"too late".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_model_errors_are_retried() {
        let (runner, log) = runner_with(vec![
            ScriptStep::error(ScriptedError::Network {
                message: "reset".into(),
            }),
            ScriptStep::error(ScriptedError::Api {
                status_code: 503,
                message: "busy".into(),
            }),
            complete("made it"),
        ]);
        let mut events = runner.events().subscribe();
        let id = runner.start(conv(), "flaky", Metadata::new()).unwrap();

        let task = wait_terminal(&runner, &id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.step_count, 1);
        assert_eq!(contents(&log).last().map(String::as_str), Some("made it"));

        let mut retries = 0;
        while let Ok(event) = events.try_recv() {
            if let DomainEvent::ModelRetry { attempt, .. } = event.as_ref() {
                retries += 1;
                assert_eq!(*attempt, retries);
            }
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_end_in_error() {
        let steps = (0..4)
            .map(|_| {
                ScriptStep::error(ScriptedError::RateLimited {
                    retry_after_secs: 1,
                })
            })
            .collect();
        let (runner, log) = runner_with(steps);
        let id = runner.start(conv(), "doomed", Metadata::new()).unwrap();

        let task = wait_terminal(&runner, &id).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.error_message.is_some());
        assert!(contents(&log).last().unwrap().starts_with("Sorry"));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_failure_never_errors_task() {
        let (runner, _) = runner_with(vec![
            ScriptStep::call("does_not_exist", serde_json::json!({})),
            complete("worked around it"),
        ]);
        let mut events = runner.events().subscribe();
        let id = runner.start(conv(), "try it", Metadata::new()).unwrap();

        let task = wait_terminal(&runner, &id).await;
        assert_eq!(task.status, TaskStatus::Completed);

        let mut saw_failed_tool = false;
        while let Ok(event) = events.try_recv() {
            match event.as_ref() {
                DomainEvent::ToolExecuted { success, .. } => saw_failed_tool |= !success,
                DomainEvent::TaskUpdated { task } => assert_ne!(task.status, TaskStatus::Error),
                _ => {}
            }
        }
        assert!(saw_failed_tool);
    }

    struct PanickingModel;

    #[async_trait]
    impl ModelClient for PanickingModel {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn complete(
            &self,
            request: ModelRequest,
            _cancel: &CancellationToken,
        ) -> Result<ModelResponse, ModelError> {
            if request.tools.is_empty() {
                return Ok(ModelResponse::text("plan"));
            }
            panic!("model exploded");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panic_in_loop_becomes_error_status() {
        let (runner, _) = runner_with_model(Arc::new(PanickingModel), test_config());
        let id = runner.start(conv(), "boom", Metadata::new()).unwrap();

        let task = wait_terminal(&runner, &id).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.error_message.unwrap().contains("model exploded"));
    }

    /// Fails every plan request; answers loop requests from a script.
    struct NoPlanModel(ScriptedModel);

    #[async_trait]
    impl ModelClient for NoPlanModel {
        fn name(&self) -> &str {
            "no-plan"
        }

        async fn complete(
            &self,
            request: ModelRequest,
            cancel: &CancellationToken,
        ) -> Result<ModelResponse, ModelError> {
            if request.tools.is_empty() {
                return Err(ModelError::Network("plan endpoint down".into()));
            }
            self.0.complete(request, cancel).await
        }
    }

    /// Answers plan requests slowly; loop requests come from a script.
    struct SlowPlanModel {
        script: Arc<ScriptedModel>,
        plan_delay: Duration,
    }

    #[async_trait]
    impl ModelClient for SlowPlanModel {
        fn name(&self) -> &str {
            "slow-plan"
        }

        async fn complete(
            &self,
            request: ModelRequest,
            cancel: &CancellationToken,
        ) -> Result<ModelResponse, ModelError> {
            if request.tools.is_empty() {
                tokio::time::sleep(self.plan_delay).await;
            }
            self.script.complete(request, cancel).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_plan_counts_against_time_budget() {
        let script = Arc::new(ScriptedModel::from_steps(vec![complete("too late")]));
        let model = SlowPlanModel {
            script: script.clone(),
            plan_delay: Duration::from_secs(100),
        };
        let mut config = test_config();
        config.agent.max_duration_ms = 60_000;
        config.agent.model_timeout_secs = 120;
        let (runner, log) = runner_with_model(Arc::new(model), config);
        let id = runner.start(conv(), "slow start", Metadata::new()).unwrap();
        tokio::time::sleep(Duration::from_secs(101)).await;

        let task = wait_terminal(&runner, &id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.step_count, 0);
        assert_eq!(script.remaining(), 1);
        assert_eq!(
            contents(&log),
            vec!["On it.".to_string(), prompt::TIME_LIMIT_MESSAGE.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn plan_failure_is_not_fatal() {
        let model = NoPlanModel(ScriptedModel::from_steps(vec![complete("done anyway")]));
        let (runner, log) = runner_with_model(Arc::new(model), test_config());
        let id = runner.start(conv(), "go", Metadata::new()).unwrap();

        let task = wait_terminal(&runner, &id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(contents(&log), vec!["done anyway"]);
    }

    struct BrokenPersona;

    #[async_trait]
    impl PersonaResolver for BrokenPersona {
        async fn system_prompt(&self, _metadata: &Metadata) -> Result<String, Error> {
            Err(Error::Internal("persona store offline".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persona_failure_falls_back_to_default() {
        let model = Arc::new(ScriptedModel::from_steps(vec![complete("ok")]));
        let (runner, _) = runner_with_model(model.clone(), test_config());
        let runner = runner.with_persona(Arc::new(BrokenPersona));
        let id = runner.start(conv(), "hi", Metadata::new()).unwrap();
        wait_terminal(&runner, &id).await;

        let loop_request = model
            .requests()
            .into_iter()
            .find(|r| !r.tools.is_empty())
            .unwrap();
        assert!(loop_request.messages[0].content.contains("You are TaskPilot"));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_tasks_are_discarded_after_retention() {
        let (runner, _) = runner_with(vec![complete("done")]);
        let id = runner.start(conv(), "short", Metadata::new()).unwrap();
        wait_terminal(&runner, &id).await;
        assert_eq!(runner.list().len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(runner.get(&id).is_none());
        assert!(runner.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let ask = || ScriptStep::call(ASK_USER, serde_json::json!({ "question": "?" }));
        let (runner, _) = runner_with(vec![ask(), ask()]);
        let a = runner.start(ConversationId::from("a"), "one", Metadata::new()).unwrap();
        let b = runner.start(ConversationId::from("b"), "two", Metadata::new()).unwrap();
        wait_until(&runner, &a, |t| t.status == TaskStatus::WaitingUser).await;
        wait_until(&runner, &b, |t| t.status == TaskStatus::WaitingUser).await;

        assert_eq!(runner.shutdown(), 2);
        assert!(runner.list().iter().all(|t| t.status == TaskStatus::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_unknown_task_is_not_found() {
        let (runner, _) = runner_with(vec![]);
        assert!(matches!(
            runner.stop(&TaskId::from("nope")),
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn updates_are_published_on_the_bus() {
        let (runner, _) = runner_with(vec![ScriptStep::text("thinking aloud"), complete("done")]);
        let mut events = runner.events().subscribe();
        let id = runner.start(conv(), "narrate", Metadata::new()).unwrap();
        wait_terminal(&runner, &id).await;

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DomainEvent::TaskUpdated { task } = event.as_ref() {
                statuses.push(task.status);
            }
        }
        assert_eq!(statuses.first(), Some(&TaskStatus::Running));
        assert_eq!(statuses.last(), Some(&TaskStatus::Completed));
        assert!(statuses.contains(&TaskStatus::Thinking));
    }
}
