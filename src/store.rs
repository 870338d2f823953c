//! Pluggable conversation persistence.
//!
//! Stores persist whole conversations keyed by id. `save` is idempotent
//! and overwrite-based: last writer wins at conversation granularity, and
//! no backend guarantees partial-item patching. At most one session should
//! hold a given conversation id as active at a time; backends do not
//! provide cross-process locking, that coordination belongs to the caller.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::model::{Conversation, ConversationId, Metadata};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistence contract for conversations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create and persist a new empty conversation.
    async fn create(&self, metadata: Option<Metadata>) -> Result<Conversation, StoreError>;

    /// Load a conversation; fails with [`StoreError::NotFound`] for an
    /// unknown id.
    async fn load(&self, id: ConversationId) -> Result<Conversation, StoreError>;

    /// Persist a conversation, overwriting any prior version.
    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// List all persisted conversations.
    async fn list(&self) -> Result<Vec<Conversation>, StoreError>;

    /// Delete a conversation; deleting an unknown id is a no-op.
    async fn delete(&self, id: ConversationId) -> Result<(), StoreError>;
}

/// In-memory store. Contents live for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create(&self, metadata: Option<Metadata>) -> Result<Conversation, StoreError> {
        let conversation = Conversation::new(metadata.unwrap_or_default());
        self.conversations
            .write()
            .expect("store lock poisoned")
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn load(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        self.conversations
            .read()
            .expect("store lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.conversations
            .write()
            .expect("store lock poisoned")
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Conversation>, StoreError> {
        let mut all: Vec<Conversation> = self
            .conversations
            .read()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|c| c.created_at);
        Ok(all)
    }

    async fn delete(&self, id: ConversationId) -> Result<(), StoreError> {
        self.conversations
            .write()
            .expect("store lock poisoned")
            .remove(&id);
        Ok(())
    }
}

/// Local-file store: one JSON file per conversation under a root directory.
///
/// Writes go through a temp file and an atomic rename so a crashed save
/// never leaves a truncated conversation behind.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: ConversationId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn ensure_root(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn create(&self, metadata: Option<Metadata>) -> Result<Conversation, StoreError> {
        let conversation = Conversation::new(metadata.unwrap_or_default());
        self.save(&conversation).await?;
        Ok(conversation)
    }

    async fn load(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        let path = self.path_for(id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.ensure_root().await?;
        let path = self.path_for(conversation.id);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(conversation)?;

        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Saved conversation {} to {}", conversation.id, path.display());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Conversation>, StoreError> {
        self.ensure_root().await?;
        let mut conversations = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Conversation>(&raw) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => {
                    tracing::warn!("Skipping unreadable conversation file {}: {e}", path.display());
                }
            }
        }

        conversations.sort_by_key(|c| c.created_at);
        Ok(conversations)
    }

    async fn delete(&self, id: ConversationId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// No-persistence store. `save` is a no-op, `load` always fails with
/// [`StoreError::NotFound`]. Conversations exist only in session memory.
#[derive(Debug, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConversationStore for NullStore {
    async fn create(&self, metadata: Option<Metadata>) -> Result<Conversation, StoreError> {
        Ok(Conversation::new(metadata.unwrap_or_default()))
    }

    async fn load(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        Err(StoreError::NotFound(id))
    }

    async fn save(&self, _conversation: &Conversation) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Conversation>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _id: ConversationId) -> Result<(), StoreError> {
        Ok(())
    }
}
