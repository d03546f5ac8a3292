//! `taskpilot run`: Run one task in the terminal.
//!
//! Model responses are replayed from a JSON script. Messages the task sends
//! are printed as they arrive; when the agent asks a question, the next line
//! typed on stdin is its answer. Ctrl+C stops the task.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use taskpilot_agent::{ScriptedModel, TaskRunner};
use taskpilot_config::AppConfig;
use taskpilot_core::{ConversationId, DomainEvent, MessageLog, Metadata, TaskStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

pub async fn run(message: String, script: PathBuf, conversation: String) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let model = ScriptedModel::from_file(&script)?;

    let log = Arc::new(MessageLog::new());
    let conversation_id = ConversationId::from(&conversation);
    log.record_user(&conversation_id, &message);

    let tools = taskpilot_tools::context_tools(Some(log.clone()))
        .merge(&taskpilot_tools::default_domain_tools());
    let runner = TaskRunner::new(Arc::new(model), log.clone(), config).with_tools(tools);

    let mut messages = log.subscribe();
    let mut events = runner.events().subscribe();
    let task_id = runner.start(conversation_id.clone(), message, Metadata::new())?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut waiting = false;

    let final_task = loop {
        tokio::select! {
            msg = messages.recv() => match msg {
                Ok(msg) if msg.conversation_id == conversation_id => {
                    println!("\n{}", msg.content);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "Output lagged"),
                Err(RecvError::Closed) => break runner.get(&task_id),
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if let DomainEvent::TaskUpdated { task } = event.as_ref()
                        && task.id == task_id
                    {
                        tracing::debug!(status = %task.status, steps = task.step_count, "Task updated");
                        waiting = task.status == TaskStatus::WaitingUser;
                        if waiting {
                            print!("\n> ");
                            let _ = std::io::stdout().flush();
                        }
                        if task.is_terminal() {
                            break Some(task.clone());
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "Events lagged"),
                Err(RecvError::Closed) => break runner.get(&task_id),
            },
            line = stdin.next_line(), if waiting => match line? {
                Some(answer) => {
                    waiting = false;
                    runner.respond(&task_id, answer.trim());
                }
                None => {
                    waiting = false;
                    runner.respond(&task_id, "");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                runner.shutdown();
                break runner.get(&task_id);
            }
        }
    };

    // Drain output delivered right before the terminal update.
    while let Ok(msg) = messages.try_recv() {
        if msg.conversation_id == conversation_id {
            println!("\n{}", msg.content);
        }
    }

    let Some(task) = final_task else {
        anyhow::bail!("task {task_id} is no longer tracked");
    };
    println!("\nTask {} finished: {} ({} steps)", task.id, task.status, task.step_count);

    match task.status {
        TaskStatus::Error => anyhow::bail!(
            "task failed: {}",
            task.error_message.as_deref().unwrap_or("unknown error")
        ),
        _ => Ok(()),
    }
}
