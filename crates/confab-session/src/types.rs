//! Core types for conversations and messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conversation as known to the durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Store-assigned identifier
    pub id: String,
    /// Opaque per-user identifier owning this conversation
    pub identity: String,
    /// Human-readable title; `None` until derived or explicitly set
    pub title: Option<String>,
    /// Model selector for the text-generation collaborator
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Wire name used by the text-generation collaborator
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A message identifier, either optimistic or store-assigned.
///
/// A message shown before the durable store confirms it carries a temporary
/// `Pending` identifier. Once persisted it is reconciled to the store's
/// `Committed` identifier in a single in-place swap, never a re-insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum MessageId {
    Pending(Uuid),
    Committed(String),
}

impl MessageId {
    /// Mint a fresh temporary identifier
    pub fn pending() -> Self {
        MessageId::Pending(Uuid::new_v4())
    }

    /// Whether the store has not yet confirmed this message
    pub fn is_pending(&self) -> bool {
        matches!(self, MessageId::Pending(_))
    }

    /// The store-assigned identifier, if committed
    pub fn committed(&self) -> Option<&str> {
        match self {
            MessageId::Committed(id) => Some(id),
            MessageId::Pending(_) => None,
        }
    }
}

/// A single message within a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create an optimistic message awaiting store confirmation
    pub fn optimistic(conversation_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::pending(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// End-user feedback on an assistant message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Up,
    Down,
}
