//! The task execution engine: the heart of TaskPilot.
//!
//! A task follows a **think → act → observe** cycle:
//!
//! 1. **Prepare**: resolve the persona and send a short plan acknowledgement
//! 2. **Think**: send the transcript and tool catalogue to the model
//! 3. **Act**: interpret control tools (`task_complete`, `ask_user`,
//!    `send_update`) or execute domain tools under a timeout
//! 4. **Observe**: append results to the transcript and loop back to 2
//!
//! The loop ends when the model calls `task_complete`, the task is stopped,
//! a budget (steps or wall-clock) runs out, or the model fails after retries.
//! [`TaskRunner`] owns every task's lifecycle; [`AgentLoop`] drives one task.

pub mod capabilities;
pub mod control;
pub mod loop_runner;
pub mod persona;
pub mod prompt;
pub mod retry;
pub mod runner;
pub mod scripted;

#[cfg(test)]
mod test_helpers;

pub use capabilities::{Capabilities, PendingResponse};
pub use control::{control_tools, ControlAction, ASK_USER, SEND_UPDATE, TASK_COMPLETE};
pub use loop_runner::{AgentLoop, LoopConfig};
pub use persona::{PersonaResolver, StaticPersona};
pub use retry::{RetryPolicy, Retryable};
pub use runner::TaskRunner;
pub use scripted::{Script, ScriptStep, ScriptedModel};
