//! # TaskPilot Core
//!
//! Domain types, traits, and error definitions for the TaskPilot agent task
//! engine. This crate has **no runtime opinions**: it defines the task model
//! and the collaborator contracts that the engine drives.
//!
//! ## Design Philosophy
//!
//! Every collaborator the engine depends on (the language model, message
//! delivery, conversation history, tools) is a trait here. Implementations
//! live with the caller. This enables:
//! - Swapping model providers without touching the loop
//! - Easy testing with scripted/recording implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod channel;
pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use channel::{ConversationMessage, HistorySource, MessageLog, MessageSink};
pub use error::{ChannelError, Error, ModelError, Result, TaskError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ConversationId, Message, MessageToolCall, Role, Transcript};
pub use model::{ModelClient, ModelRequest, ModelResponse, ToolDefinition, Usage};
pub use task::{Metadata, SharedTask, Task, TaskId, TaskStatus};
pub use tool::{Tool, ToolCall, ToolContext, ToolOutput, ToolResult, ToolSet};

pub use tokio_util::sync::CancellationToken;
