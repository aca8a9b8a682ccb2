//! Durable conversation store seam
//!
//! The store owns all durable message ordering; the controller only appends.
//! No retry policy lives at this layer: only the controller knows whether a
//! retry is safe, and a possibly-applied append must never be blindly
//! retried.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatMessage, Conversation, Feedback, Role};

/// Contract the session controller depends on for durable persistence.
///
/// Implementations assign durable message identifiers in `append_message`;
/// the controller reconciles its optimistic identifiers against them.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// List an identity's conversations, newest-updated first
    async fn list_conversations(&self, identity: &str) -> Result<Vec<Conversation>>;

    /// Fetch a conversation and its messages in creation order
    async fn get_conversation(&self, id: &str) -> Result<(Conversation, Vec<ChatMessage>)>;

    /// Create a conversation, optionally titled
    async fn create_conversation(&self, identity: &str, title: Option<&str>)
    -> Result<Conversation>;

    /// Append a message; the store assigns the durable identifier
    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage>;

    /// Set a conversation's title
    async fn rename_conversation(&self, id: &str, title: &str) -> Result<()>;

    /// Delete a conversation, cascading to its messages and feedback
    async fn delete_conversation(&self, id: &str) -> Result<()>;

    /// Upsert end-user feedback on a message; the latest feedback per
    /// identity per message wins
    async fn record_feedback(&self, identity: &str, message_id: &str, feedback: Feedback)
    -> Result<()>;
}
