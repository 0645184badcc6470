//! Session module - conversation data model and answer persistence
//!
//! The orchestrator hands every final answer, together with its progress
//! trace, to a [`MessageStore`]. Storage is a collaborator: a failure to store
//! is logged by the caller and never turns a successful cycle into an error.
//!
//! # Example
//!
//! ```
//! use mcpdrive::session::{ConversationStore, MessageStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = ConversationStore::new_memory();
//!     store.store_assistant_message("chat-1", "Done.", None).await.unwrap();
//!
//!     let history = store.history("chat-1").await.unwrap();
//!     assert_eq!(history.len(), 1);
//!     assert_eq!(history[0].content, "Done.");
//! }
//! ```

pub mod types;

pub use types::{
    extract_text, find_orphan_tool_result, ContentPart, ConversationMessage, InvocationStatus,
    MessageContent, ProgressRecord, Role, ToolInvocation,
};

use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A persisted assistant answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressRecord>,
    pub created_at: DateTime<Utc>,
}

/// Sink for final answers produced by a generation cycle.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist the final assistant answer for a conversation.
    async fn store_assistant_message(
        &self,
        chat_id: &str,
        content: &str,
        progress: Option<ProgressRecord>,
    ) -> Result<()>;
}

/// Conversation store keeping answers in memory, optionally mirrored to disk.
///
/// Each conversation is written to `<dir>/<chat_id>.json` as a JSON array of
/// [`StoredMessage`]. Cloning shares the underlying cache.
#[derive(Clone)]
pub struct ConversationStore {
    conversations: Arc<RwLock<HashMap<String, Vec<StoredMessage>>>>,
    storage_path: Option<PathBuf>,
}

impl ConversationStore {
    /// Create a store persisting to `~/.mcpdrive/conversations/`.
    pub fn new() -> Result<Self> {
        Self::with_path(Config::dir().join("conversations"))
    }

    /// Create a store without persistence.
    pub fn new_memory() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            storage_path: None,
        }
    }

    /// Create a store persisting to a custom directory.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            storage_path: Some(path),
        })
    }

    /// Stored answers for a conversation, oldest first.
    pub async fn history(&self, chat_id: &str) -> Result<Vec<StoredMessage>> {
        {
            let conversations = self.conversations.read().await;
            if let Some(messages) = conversations.get(chat_id) {
                return Ok(messages.clone());
            }
        }

        if let Some(file_path) = self.file_path(chat_id) {
            if file_path.exists() {
                let content = tokio::fs::read_to_string(&file_path).await?;
                let messages: Vec<StoredMessage> = serde_json::from_str(&content)?;
                let mut conversations = self.conversations.write().await;
                conversations.insert(chat_id.to_string(), messages.clone());
                return Ok(messages);
            }
        }

        Ok(Vec::new())
    }

    /// Number of conversations held in memory.
    pub async fn cache_size(&self) -> usize {
        self.conversations.read().await.len()
    }

    fn file_path(&self, chat_id: &str) -> Option<PathBuf> {
        self.storage_path
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", sanitize_key(chat_id))))
    }
}

#[async_trait]
impl MessageStore for ConversationStore {
    async fn store_assistant_message(
        &self,
        chat_id: &str,
        content: &str,
        progress: Option<ProgressRecord>,
    ) -> Result<()> {
        // Load any on-disk history first so the write below does not clobber it.
        let mut messages = self.history(chat_id).await?;
        messages.push(StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role: Role::Assistant,
            content: content.to_string(),
            progress,
            created_at: Utc::now(),
        });

        if let Some(file_path) = self.file_path(chat_id) {
            let json = serde_json::to_string_pretty(&messages)?;
            tokio::fs::write(&file_path, json).await?;
        }

        let mut conversations = self.conversations.write().await;
        conversations.insert(chat_id.to_string(), messages);
        Ok(())
    }
}

/// Percent-encode characters that are unsafe in file names.
fn sanitize_key(key: &str) -> String {
    let mut result = String::with_capacity(key.len() * 3);
    for c in key.chars() {
        match c {
            '/' => result.push_str("%2F"),
            '\\' => result.push_str("%5C"),
            ':' => result.push_str("%3A"),
            '*' => result.push_str("%2A"),
            '?' => result.push_str("%3F"),
            '"' => result.push_str("%22"),
            '<' => result.push_str("%3C"),
            '>' => result.push_str("%3E"),
            '|' => result.push_str("%7C"),
            '%' => result.push_str("%25"),
            c => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_store_appends() {
        let store = ConversationStore::new_memory();
        store
            .store_assistant_message("c1", "first", None)
            .await
            .unwrap();
        store
            .store_assistant_message("c1", "second", None)
            .await
            .unwrap();

        let history = store.history("c1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "second");
        assert_eq!(history[1].role, Role::Assistant);
        assert!(store.history("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_is_kept() {
        let store = ConversationStore::new_memory();
        let mut inv = ToolInvocation::start("t1", "browser_click", "Clicking OK".into(), json!({}));
        inv.complete();
        let record = ProgressRecord::new(vec![inv], 2, 50);
        store
            .store_assistant_message("c1", "ok", Some(record.clone()))
            .await
            .unwrap();

        let history = store.history("c1").await.unwrap();
        assert_eq!(history[0].progress.as_ref(), Some(&record));
    }

    #[tokio::test]
    async fn test_file_store_survives_new_instance() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::with_path(dir.path().to_path_buf()).unwrap();
        store
            .store_assistant_message("web:chat/7", "persisted", None)
            .await
            .unwrap();

        assert!(dir.path().join("web%3Achat%2F7.json").exists());

        let reopened = ConversationStore::with_path(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.cache_size().await, 0);
        let history = reopened.history("web:chat/7").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "persisted");
    }

    #[test]
    fn test_sanitize_key_distinct() {
        assert_eq!(sanitize_key("a:b"), "a%3Ab");
        assert_ne!(sanitize_key("a_b"), sanitize_key("a:b"));
        assert_eq!(sanitize_key("100%"), "100%25");
    }
}
