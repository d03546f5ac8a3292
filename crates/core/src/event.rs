//! Domain event system: status broadcasts for UIs and other observers.
//!
//! Events are published when something interesting happens to a task.
//! Observers subscribe without the engine knowing who they are.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::task::Task;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A task changed state; carries a snapshot of the task
    TaskUpdated { task: Task },

    /// A message was delivered to a conversation on behalf of a task
    MessageSent {
        task_id: String,
        conversation_id: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A domain tool was executed
    ToolExecuted {
        task_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A model call failed transiently and will be retried
    ModelRetry {
        task_id: String,
        attempt: u32,
        delay_ms: u64,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Event name, as used by listeners that route on type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskUpdated { .. } => "task_updated",
            Self::MessageSent { .. } => "message_sent",
            Self::ToolExecuted { .. } => "tool_executed",
            Self::ModelRetry { .. } => "model_retry",
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        tracing::trace!(event = event.event_type(), "Publishing event");
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
