//! Error types for the TaskPilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all TaskPilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Task lifecycle errors ---
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the "call the model" capability.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model call cancelled")]
    Cancelled,

    #[error("Model not configured: {0}")]
    NotConfigured(String),
}

impl ModelError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Transport failures, timeouts, rate limits and server-side status codes
    /// (408, 429, 5xx) are transient. Everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => {
                matches!(status_code, 408 | 429) || (500..600).contains(status_code)
            }
            Self::AuthenticationFailed(_)
            | Self::InvalidRequest(_)
            | Self::Cancelled
            | Self::NotConfigured(_) => false,
        }
    }

    /// Server-provided wait hint, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Message delivery failed to {conversation_id}: {reason}")]
    DeliveryFailed {
        conversation_id: String,
        reason: String,
    },

    #[error("Channel closed: {0}")]
    Closed(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool cancelled: {0}")]
    Cancelled(String),
}

impl ToolError {
    /// A short recovery suggestion returned to the model alongside the error.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "Use one of the tools listed in your tool catalogue.",
            Self::ExecutionFailed { .. } => {
                "Check the arguments or try a different approach to reach the same goal."
            }
            Self::Timeout { .. } => {
                "The operation took too long. Try a smaller or faster operation."
            }
            Self::PermissionDenied { .. } => {
                "This action is not permitted. Choose a different action or ask the user."
            }
            Self::InvalidArguments(_) => {
                "Re-check the tool's parameter schema and call it again with valid arguments."
            }
            Self::Cancelled(_) => "The task is being stopped.",
        }
    }

    /// Render as the structured `{error, hint}` object fed back to the model.
    pub fn to_structured(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "hint": self.hint(),
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Conversation {conversation_id} already has an active task ({task_id})")]
    ConversationBusy {
        conversation_id: String,
        task_id: String,
    },
}
