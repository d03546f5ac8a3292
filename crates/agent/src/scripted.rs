//! Scripted model: replays canned responses instead of calling a provider.
//!
//! Used by the binary as an offline replay harness and by tests. A script is
//! JSON:
//!
//! ```json
//! {
//!   "plan": "I'll list the directory first.",
//!   "responses": [
//!     { "type": "tool_calls", "calls": [{ "name": "shell", "arguments": { "command": "ls" } }] },
//!     { "type": "text", "text": "Found three files." },
//!     { "type": "error", "error": { "kind": "network", "message": "reset" } },
//!     { "type": "tool_calls", "calls": [{ "name": "task_complete", "arguments": { "summary": "Done" } }] }
//!   ]
//! }
//! ```
//!
//! Requests that carry no tools (the plan acknowledgement) are answered with
//! `plan` and do not consume a queued response.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use taskpilot_core::error::{Error, ModelError};
use taskpilot_core::message::MessageToolCall;
use taskpilot_core::model::{ModelClient, ModelRequest, ModelResponse};
use tokio_util::sync::CancellationToken;

const DEFAULT_PLAN: &str = "On it.";

/// The on-disk script.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,

    #[serde(default)]
    pub responses: Vec<ScriptedResponse>,
}

/// One queued model answer, optionally delayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedResponse {
    /// Simulated latency before answering
    #[serde(default)]
    pub delay_ms: u64,

    #[serde(flatten)]
    pub step: ScriptStep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptStep {
    Text {
        text: String,
    },
    ToolCalls {
        #[serde(default)]
        text: String,
        calls: Vec<ScriptedCall>,
    },
    Error {
        error: ScriptedError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptedError {
    Network { message: String },
    Timeout { message: String },
    RateLimited { retry_after_secs: u64 },
    Api { status_code: u16, message: String },
    Auth { message: String },
    InvalidRequest { message: String },
}

impl From<ScriptedError> for ModelError {
    fn from(e: ScriptedError) -> Self {
        match e {
            ScriptedError::Network { message } => ModelError::Network(message),
            ScriptedError::Timeout { message } => ModelError::Timeout(message),
            ScriptedError::RateLimited { retry_after_secs } => {
                ModelError::RateLimited { retry_after_secs }
            }
            ScriptedError::Api {
                status_code,
                message,
            } => ModelError::ApiError {
                status_code,
                message,
            },
            ScriptedError::Auth { message } => ModelError::AuthenticationFailed(message),
            ScriptedError::InvalidRequest { message } => ModelError::InvalidRequest(message),
        }
    }
}

impl ScriptStep {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// A single tool call with no accompanying text.
    pub fn call(name: &str, arguments: serde_json::Value) -> Self {
        Self::ToolCalls {
            text: String::new(),
            calls: vec![ScriptedCall {
                id: None,
                name: name.to_string(),
                arguments,
            }],
        }
    }

    pub fn error(error: ScriptedError) -> Self {
        Self::Error { error }
    }
}

impl From<ScriptStep> for ScriptedResponse {
    fn from(step: ScriptStep) -> Self {
        Self { delay_ms: 0, step }
    }
}

/// A [`ModelClient`] that replays a [`Script`].
pub struct ScriptedModel {
    plan: String,
    queue: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
    next_call_id: Mutex<u32>,
}

impl ScriptedModel {
    pub fn new(script: Script) -> Self {
        Self {
            plan: script.plan.unwrap_or_else(|| DEFAULT_PLAN.to_string()),
            queue: Mutex::new(script.responses.into()),
            requests: Mutex::new(Vec::new()),
            next_call_id: Mutex::new(0),
        }
    }

    /// A script of undelayed steps with the default plan text.
    pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
        Self::new(Script {
            plan: None,
            responses: steps.into_iter().map(ScriptedResponse::from).collect(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let script: Script = serde_json::from_str(json)?;
        Ok(Self::new(script))
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read script {}: {e}", path.display()),
        })?;
        Self::from_json(&json)
    }

    /// Every request received, including plan requests.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of queued responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn call_id(&self, explicit: Option<String>) -> String {
        explicit.unwrap_or_else(|| {
            let mut next = self.next_call_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            format!("call_{}", *next)
        })
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ModelError> {
        let is_plan = request.tools.is_empty();
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        if is_plan {
            return Ok(ModelResponse::text(self.plan.clone()));
        }

        let next = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let Some(ScriptedResponse { delay_ms, step }) = next else {
            return Err(ModelError::NotConfigured(
                "scripted model has no more responses".into(),
            ));
        };

        if delay_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            }
        }

        match step {
            ScriptStep::Text { text } => Ok(ModelResponse::text(text)),
            ScriptStep::ToolCalls { text, calls } => {
                let calls = calls
                    .into_iter()
                    .map(|c| MessageToolCall {
                        id: self.call_id(c.id),
                        name: c.name,
                        arguments: c.arguments.to_string(),
                    })
                    .collect();
                Ok(ModelResponse::tool_calls(text, calls))
            }
            ScriptStep::Error { error } => Err(error.into()),
        }
    }
}
