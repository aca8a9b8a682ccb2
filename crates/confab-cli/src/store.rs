//! File-backed conversation store
//!
//! One JSON file per conversation under the data directory, holding the
//! conversation metadata, its ordered messages, and per-message feedback.
//! A reference adapter for the store seam, not a storage engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

use confab_session::{
    ChatMessage, Conversation, ConversationStore, Error, Feedback, MessageId, Result, Role,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessage {
    id: String,
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

impl StoredMessage {
    fn to_chat(&self, conversation_id: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::Committed(self.id.clone()),
            conversation_id: conversation_id.to_string(),
            role: self.role,
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeedbackRecord {
    identity: String,
    message_id: String,
    feedback: Feedback,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConversationFile {
    conversation: Conversation,
    messages: Vec<StoredMessage>,
    #[serde(default)]
    feedback: Vec<FeedbackRecord>,
}

/// Conversation store persisting each conversation as one JSON file
pub struct FileStore {
    dir: PathBuf,
    default_model: String,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating it if needed
    pub fn open(dir: impl Into<PathBuf>, default_model: impl Into<String>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            default_model: default_model.into(),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn read(&self, id: &str) -> Result<ConversationFile> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(Error::NotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path).map_err(store_err)?;
        serde_json::from_str(&content).map_err(store_err)
    }

    fn write(&self, file: &ConversationFile) -> Result<()> {
        let content = serde_json::to_string_pretty(file).map_err(store_err)?;
        fs::write(self.path_for(&file.conversation.id), content).map_err(store_err)
    }

    fn read_all(&self) -> Result<Vec<ConversationFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(store_err)? {
            let path = entry.map_err(store_err)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(store_err)?;
            match serde_json::from_str(&content) {
                Ok(file) => files.push(file),
                Err(e) => {
                    tracing::warn!("skipping unreadable conversation {}: {}", path.display(), e);
                }
            }
        }
        Ok(files)
    }
}

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::Store(e.to_string())
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn list_conversations(&self, identity: &str) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .read_all()?
            .into_iter()
            .map(|f| f.conversation)
            .filter(|c| c.identity == identity)
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn get_conversation(&self, id: &str) -> Result<(Conversation, Vec<ChatMessage>)> {
        let file = self.read(id)?;
        let messages = file
            .messages
            .iter()
            .map(|m| m.to_chat(&file.conversation.id))
            .collect();
        Ok((file.conversation, messages))
    }

    async fn create_conversation(
        &self,
        identity: &str,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            identity: identity.to_string(),
            title: title.map(str::to_string),
            model: self.default_model.clone(),
            created_at: now,
            updated_at: now,
        };
        self.write(&ConversationFile {
            conversation: conversation.clone(),
            messages: Vec::new(),
            feedback: Vec::new(),
        })?;
        Ok(conversation)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage> {
        let mut file = self.read(conversation_id)?;
        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        file.messages.push(stored.clone());
        file.conversation.updated_at = Utc::now();
        self.write(&file)?;
        Ok(stored.to_chat(conversation_id))
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<()> {
        let mut file = self.read(id)?;
        file.conversation.title = Some(title.to_string());
        file.conversation.updated_at = Utc::now();
        self.write(&file)
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(Error::NotFound(id.to_string()));
        }
        fs::remove_file(path).map_err(store_err)
    }

    async fn record_feedback(
        &self,
        identity: &str,
        message_id: &str,
        feedback: Feedback,
    ) -> Result<()> {
        for mut file in self.read_all()? {
            if !file.messages.iter().any(|m| m.id == message_id) {
                continue;
            }
            match file
                .feedback
                .iter_mut()
                .find(|r| r.identity == identity && r.message_id == message_id)
            {
                Some(record) => record.feedback = feedback,
                None => file.feedback.push(FeedbackRecord {
                    identity: identity.to_string(),
                    message_id: message_id.to_string(),
                    feedback,
                }),
            }
            return self.write(&file);
        }
        Err(Error::NotFound(message_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("confab-store-test-{}", Uuid::new_v4()));
            Self(dir)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn open_store(dir: &TempDir) -> FileStore {
        FileStore::open(&dir.0, "test-model").unwrap()
    }

    #[tokio::test]
    async fn test_create_append_and_reload() {
        let dir = TempDir::new();
        let store = open_store(&dir);

        let conversation = store.create_conversation("alice", None).await.unwrap();
        assert!(conversation.title.is_none());
        assert_eq!(conversation.model, "test-model");

        let user = store
            .append_message(&conversation.id, Role::User, "Hi")
            .await
            .unwrap();
        store
            .append_message(&conversation.id, Role::Assistant, "Hello!")
            .await
            .unwrap();
        assert!(!user.id.is_pending());

        // A fresh handle sees the same durable state
        let store = open_store(&dir);
        let (loaded, messages) = store.get_conversation(&conversation.id).await.unwrap();
        assert_eq!(loaded.id, conversation.id);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Hi");
        assert_eq!(messages[1].content, "Hello!");
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_list_is_newest_updated_first_and_scoped_to_identity() {
        let dir = TempDir::new();
        let store = open_store(&dir);

        let older = store.create_conversation("alice", Some("old")).await.unwrap();
        let newer = store.create_conversation("alice", Some("new")).await.unwrap();
        store.create_conversation("bob", None).await.unwrap();

        // Touch the older one so it becomes most recently updated
        store
            .append_message(&older.id, Role::User, "bump")
            .await
            .unwrap();

        let list = store.list_conversations("alice").await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, older.id);
        assert_eq!(list[1].id, newer.id);
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let dir = TempDir::new();
        let store = open_store(&dir);

        let conversation = store.create_conversation("alice", None).await.unwrap();
        store
            .rename_conversation(&conversation.id, "Named")
            .await
            .unwrap();
        let (loaded, _) = store.get_conversation(&conversation.id).await.unwrap();
        assert_eq!(loaded.title.as_deref(), Some("Named"));

        store.delete_conversation(&conversation.id).await.unwrap();
        assert!(matches!(
            store.get_conversation(&conversation.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_feedback_upsert_latest_wins() {
        let dir = TempDir::new();
        let store = open_store(&dir);

        let conversation = store.create_conversation("alice", None).await.unwrap();
        let message = store
            .append_message(&conversation.id, Role::Assistant, "reply")
            .await
            .unwrap();
        let message_id = message.id.committed().unwrap();

        store
            .record_feedback("alice", message_id, Feedback::Up)
            .await
            .unwrap();
        store
            .record_feedback("alice", message_id, Feedback::Down)
            .await
            .unwrap();
        // A second identity's feedback is tracked separately
        store
            .record_feedback("bob", message_id, Feedback::Up)
            .await
            .unwrap();

        let file = store.read(&conversation.id).unwrap();
        assert_eq!(file.feedback.len(), 2);
        let alice = file
            .feedback
            .iter()
            .find(|r| r.identity == "alice")
            .unwrap();
        assert_eq!(alice.feedback, Feedback::Down);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let dir = TempDir::new();
        let store = open_store(&dir);
        assert!(matches!(
            store.get_conversation("missing").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.record_feedback("alice", "missing", Feedback::Up).await,
            Err(Error::NotFound(_))
        ));
    }
}
