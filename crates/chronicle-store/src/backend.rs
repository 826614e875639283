//! Backend dispatch.
//!
//! The built-in drivers are dispatched through [`StoreBackend`]; anything
//! else plugs in through the [`CustomStore`] trait and the
//! [`StoreBackend::Custom`] variant.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chronicle_types::Dialogue;

use crate::cache::CacheStore;
use crate::document::DocumentStore;
use crate::error::StoreError;
use crate::memory::MemoryStore;
use crate::relational::RelationalStore;

/// An externally supplied storage driver.
#[async_trait]
pub trait CustomStore: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Persist the dialogue.
    async fn save(&self, dialogue: &Dialogue) -> Result<(), StoreError>;

    /// Load the dialogue for `sender_id`, if stored.
    async fn retrieve(&self, sender_id: &str) -> Result<Option<Dialogue>, StoreError>;

    /// Every stored sender id.
    async fn keys(&self) -> Result<BTreeSet<String>, StoreError>;
}

/// A configured storage driver.
pub enum StoreBackend {
    /// In-process, non-durable.
    Memory(MemoryStore),
    /// `Dragonfly`/Redis with optional expiry.
    Cache(CacheStore),
    /// One JSONB document per conversation.
    Document(DocumentStore),
    /// One row per event.
    Relational(RelationalStore),
    /// Externally supplied driver.
    Custom(Box<dyn CustomStore>),
}

impl StoreBackend {
    /// Short name of the driver, for logs.
    pub fn name(&self) -> &str {
        match self {
            Self::Memory(_) => "memory",
            Self::Cache(_) => "cache",
            Self::Document(_) => "document",
            Self::Relational(_) => "relational",
            Self::Custom(store) => store.name(),
        }
    }

    /// Persist the dialogue in the driver's native form.
    ///
    /// # Errors
    ///
    /// Propagates the driver's [`StoreError`].
    pub async fn save(&self, dialogue: &Dialogue) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.save(dialogue).await,
            Self::Cache(store) => store.save(dialogue).await,
            Self::Document(store) => store.save(dialogue).await,
            Self::Relational(store) => store.save(dialogue).await,
            Self::Custom(store) => store.save(dialogue).await,
        }
    }

    /// Load the stored dialogue for `sender_id`.
    ///
    /// # Errors
    ///
    /// Propagates the driver's [`StoreError`]. An absent record is `Ok(None)`.
    pub async fn retrieve(&self, sender_id: &str) -> Result<Option<Dialogue>, StoreError> {
        match self {
            Self::Memory(store) => store.retrieve(sender_id).await,
            Self::Cache(store) => store.retrieve(sender_id).await,
            Self::Document(store) => store.retrieve(sender_id).await,
            Self::Relational(store) => store.retrieve(sender_id).await,
            Self::Custom(store) => store.retrieve(sender_id).await,
        }
    }

    /// Every stored sender id.
    ///
    /// # Errors
    ///
    /// Propagates the driver's [`StoreError`].
    pub async fn keys(&self) -> Result<BTreeSet<String>, StoreError> {
        match self {
            Self::Memory(store) => Ok(store.keys().await),
            Self::Cache(store) => store.keys().await,
            Self::Document(store) => store.keys().await,
            Self::Relational(store) => store.keys().await,
            Self::Custom(store) => store.keys().await,
        }
    }
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::Memory(MemoryStore::new())
    }
}

impl std::fmt::Debug for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(store) => f.debug_tuple("Memory").field(store).finish(),
            Self::Cache(store) => f.debug_tuple("Cache").field(store).finish(),
            Self::Document(store) => f.debug_tuple("Document").field(store).finish(),
            Self::Relational(store) => f.debug_tuple("Relational").field(store).finish(),
            Self::Custom(store) => f.debug_tuple("Custom").field(&store.name()).finish(),
        }
    }
}
