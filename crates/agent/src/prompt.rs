//! Prompt text used by the engine.

use taskpilot_core::message::Message;

use crate::control::{ASK_USER, SEND_UPDATE, TASK_COMPLETE};

/// Fixed operating instructions appended to every persona.
pub fn agentic_instructions() -> String {
    format!(
        "## How you work\n\
         You are running as an autonomous agent on a multi-step task. On every step, \
         either call one or more tools or reply with a short progress note.\n\
         \n\
         - Work step by step. Prefer acting with tools over describing what you would do.\n\
         - You do NOT see earlier messages of this conversation. If the request refers to \
         something said before, call `conversation_history` to retrieve it.\n\
         - Use `remember_for_next_step` to keep an intermediate value for your next step only.\n\
         - Use `{SEND_UPDATE}` to tell the user about meaningful progress on long tasks.\n\
         - Only call `{ASK_USER}` when you genuinely cannot continue without the user's input. \
         Ask one clear question.\n\
         - If a tool fails you receive an object with `error` and `hint`. Adapt and try another way.\n\
         - When the task is done, call `{TASK_COMPLETE}` with a concise summary. Replying with \
         text alone does not end the task."
    )
}

/// The effective system prompt: persona text, then operating instructions.
pub fn build_system_prompt(persona: &str) -> String {
    let persona = persona.trim();
    if persona.is_empty() {
        return agentic_instructions();
    }
    format!("{persona}\n\n{}", agentic_instructions())
}

/// Nudge appended when the model produced neither text nor tool calls.
pub const EMPTY_RESPONSE_NUDGE: &str =
    "No response was produced. Continue working on the task, or call task_complete if it is done.";

/// Transcript entry for a queued immediate memory.
pub fn immediate_memory_note(note: &str) -> String {
    format!("Note you asked to remember for this step: {note}")
}

/// Messages for the low-token plan acknowledgement sent before step one.
pub fn plan_messages(persona: &str, request: &str) -> Vec<Message> {
    vec![
        Message::system(format!(
            "{}\n\nYou are about to start working on the user's request. In one or two \
             sentences, tell the user what you are going to do. Do not call tools and do not \
             ask questions.",
            persona.trim()
        )),
        Message::user(request),
    ]
}

pub const TIME_LIMIT_MESSAGE: &str =
    "I stopped working on this task because it reached its time limit.";

pub const STEP_LIMIT_MESSAGE: &str =
    "I stopped working on this task because it reached the maximum number of steps.";

pub fn model_failure_message(error: &str) -> String {
    format!("Sorry, I couldn't finish this task because the model request failed: {error}")
}
