//! Persona resolution: who the agent is for a given task.
//!
//! The resolver returns the persona text only. The engine appends its own
//! operating instructions (see [`crate::prompt::build_system_prompt`]).

use async_trait::async_trait;
use taskpilot_config::PersonaConfig;
use taskpilot_core::error::Error;
use taskpilot_core::task::Metadata;

/// Metadata key that selects a per-task persona override.
pub const PERSONA_METADATA_KEY: &str = "persona";

/// Resolves the persona text for a task.
///
/// May hit storage or the network, so failures are retried by the runner.
#[async_trait]
pub trait PersonaResolver: Send + Sync {
    async fn system_prompt(&self, metadata: &Metadata) -> Result<String, Error>;
}

/// A persona fixed at construction time.
#[derive(Debug, Clone)]
pub struct StaticPersona {
    prompt: String,
}

impl StaticPersona {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }

    pub fn from_config(config: &PersonaConfig) -> Self {
        match &config.system_prompt_override {
            Some(text) => Self::new(text.clone()),
            None => Self::new(default_persona(&config.name)),
        }
    }
}

impl Default for StaticPersona {
    fn default() -> Self {
        Self::from_config(&PersonaConfig::default())
    }
}

pub fn default_persona(name: &str) -> String {
    format!(
        "You are {name}, a capable assistant that completes tasks on the user's behalf. \
         Be direct and concise."
    )
}

#[async_trait]
impl PersonaResolver for StaticPersona {
    /// A string `persona` entry in the task metadata replaces the configured text.
    async fn system_prompt(&self, metadata: &Metadata) -> Result<String, Error> {
        let prompt = metadata
            .get(PERSONA_METADATA_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.prompt);
        Ok(prompt.to_string())
    }
}
