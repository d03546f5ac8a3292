//! Configuration loading, validation, and management for TaskPilot.
//!
//! Loads configuration from `~/.taskpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.taskpilot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Step executor budgets and timeouts
    #[serde(default)]
    pub agent: AgentConfig,

    /// Model-call retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Instant "plan" acknowledgement sent before the first step
    #[serde(default)]
    pub plan: PlanConfig,

    /// Task registry housekeeping
    #[serde(default)]
    pub tasks: TasksConfig,

    /// Persona used to build the system prompt
    #[serde(default)]
    pub persona: PersonaConfig,
}

/// Budgets and timeouts for a single task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model calls per task
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Pause between steps, to avoid hammering the provider
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    /// Wall-clock ceiling per task (0 = unlimited)
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,

    /// Per-attempt model call timeout
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Hard per-invocation tool timeout
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Whether to render tool call records into outgoing messages
    #[serde(default = "default_true")]
    pub show_tool_records: bool,
}

fn default_max_steps() -> u32 {
    50
}
fn default_step_delay_ms() -> u64 {
    500
}
fn default_max_duration_ms() -> u64 {
    30 * 60 * 1000
}
fn default_model_timeout_secs() -> u64 {
    120
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            step_delay_ms: default_step_delay_ms(),
            max_duration_ms: default_max_duration_ms(),
            model_timeout_secs: default_model_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            show_tool_records: true,
        }
    }
}

/// Exponential backoff with jitter for transient model errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = no retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap for exponential growth
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor per attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Maximum jitter as a fraction of the delay
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter_factor() -> f64 {
    0.25
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Attempts before the plan message is skipped
    #[serde(default = "default_plan_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_plan_max_tokens")]
    pub max_tokens: u32,
}

fn default_plan_attempts() -> u32 {
    2
}
fn default_plan_max_tokens() -> u32 {
    150
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_plan_attempts(),
            max_tokens: default_plan_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// How long terminal tasks stay queryable before being discarded
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_retention_secs() -> u64 {
    300
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,

    /// Override the persona text entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,
}

fn default_persona_name() -> String {
    "TaskPilot".into()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            system_prompt_override: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.taskpilot/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `TASKPILOT_MAX_STEPS`
    /// - `TASKPILOT_MAX_DURATION_MS`
    /// - `TASKPILOT_STEP_DELAY_MS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_number("TASKPILOT_MAX_STEPS")? {
            self.agent.max_steps = narrow_u32("TASKPILOT_MAX_STEPS", v)?;
        }
        if let Some(v) = env_number("TASKPILOT_MAX_DURATION_MS")? {
            self.agent.max_duration_ms = v;
        }
        if let Some(v) = env_number("TASKPILOT_STEP_DELAY_MS")? {
            self.agent.step_delay_ms = v;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::ValidationError(
                "retry.jitter_factor must be between 0.0 and 1.0".into(),
            ));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.backoff_multiplier must be >= 1.0".into(),
            ));
        }

        if self.plan.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "plan.max_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn env_number(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::ValidationError(format!("{key} must be an integer, got '{raw}'"))),
        Err(_) => Ok(None),
    }
}

fn narrow_u32(key: &str, value: u64) -> Result<u32, ConfigError> {
    u32::try_from(value)
        .map_err(|_| ConfigError::ValidationError(format!("{key} is out of range: {value}")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
