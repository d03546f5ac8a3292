//! Message delivery and conversation history contracts.
//!
//! The engine talks to a conversation through a [`MessageSink`]: every
//! message it sends is expected to be persisted and pushed to live listeners.
//! Earlier turns are only visible to the agent when it asks for them through a
//! [`HistorySource`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::error::ChannelError;
use crate::message::{ConversationId, Role};
use crate::task::Metadata;

/// A message as stored in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub conversation_id: ConversationId,

    pub role: Role,

    pub content: String,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: Metadata,

    pub timestamp: DateTime<Utc>,
}

/// Delivers engine output to a conversation.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Persist and broadcast an assistant message.
    async fn send(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        metadata: &Metadata,
    ) -> std::result::Result<(), ChannelError>;
}

/// Read access to earlier turns of a conversation.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// The most recent `limit` messages, oldest first.
    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> std::result::Result<Vec<ConversationMessage>, ChannelError>;
}

/// An in-process conversation store.
///
/// Implements both [`MessageSink`] and [`HistorySource`], and rebroadcasts
/// every stored message to subscribers.
pub struct MessageLog {
    conversations: Mutex<HashMap<ConversationId, Vec<ConversationMessage>>>,
    sender: broadcast::Sender<ConversationMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            conversations: Mutex::new(HashMap::new()),
            sender,
        }
    }

    /// Record a user turn (e.g. the prompt that started a task).
    pub fn record_user(&self, conversation_id: &ConversationId, content: &str) {
        self.store(ConversationMessage {
            conversation_id: conversation_id.clone(),
            role: Role::User,
            content: content.to_string(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        });
    }

    fn store(&self, message: ConversationMessage) {
        self.conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.clone());
        let _ = self.sender.send(message);
    }

    /// All stored messages of a conversation, oldest first.
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<ConversationMessage> {
        self.conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Subscribe to every message stored from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationMessage> {
        self.sender.subscribe()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSink for MessageLog {
    async fn send(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        metadata: &Metadata,
    ) -> std::result::Result<(), ChannelError> {
        self.store(ConversationMessage {
            conversation_id: conversation_id.clone(),
            role: Role::Assistant,
            content: content.to_string(),
            metadata: metadata.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl HistorySource for MessageLog {
    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> std::result::Result<Vec<ConversationMessage>, ChannelError> {
        let all = self.messages(conversation_id);
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }
}
