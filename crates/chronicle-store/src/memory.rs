//! In-process tracker storage.
//!
//! Dialogues are kept as encoded bytes in a map guarded by an async
//! read-write lock. Nothing survives a restart. Saves overwrite.

use std::collections::{BTreeSet, HashMap};

use chronicle_types::Dialogue;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::serializer;

/// Non-durable store holding encoded dialogues in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the record for the dialogue's sender.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if encoding fails.
    pub async fn save(&self, dialogue: &Dialogue) -> Result<(), StoreError> {
        let encoded = serializer::encode_dialogue(dialogue)?;
        self.records
            .write()
            .await
            .insert(dialogue.sender_id.clone(), encoded);
        Ok(())
    }

    /// Decode the record for `sender_id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns a serializer error if the stored record is corrupt.
    pub async fn retrieve(&self, sender_id: &str) -> Result<Option<Dialogue>, StoreError> {
        let records = self.records.read().await;
        let Some(encoded) = records.get(sender_id) else {
            debug!(sender_id, "no in-memory record");
            return Ok(None);
        };
        debug!(sender_id, "recreating dialogue from memory");
        serializer::decode_dialogue(encoded.as_bytes()).map(Some)
    }

    /// Every sender id with a record.
    pub async fn keys(&self) -> BTreeSet<String> {
        self.records.read().await.keys().cloned().collect()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chronicle_types::Event;

    use super::*;

    #[tokio::test]
    async fn missing_record_is_none() {
        let store = MemoryStore::new();
        assert!(matches!(store.retrieve("nobody").await, Ok(None)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn save_then_retrieve() {
        let store = MemoryStore::new();
        let dialogue = Dialogue::new("alice", vec![Event::action("action_listen")]);
        assert!(store.save(&dialogue).await.is_ok());

        let loaded = store.retrieve("alice").await;
        assert!(matches!(loaded, Ok(Some(ref d)) if *d == dialogue));
    }

    #[tokio::test]
    async fn save_overwrites_previous_record() {
        let store = MemoryStore::new();
        let first = Dialogue::new("alice", vec![Event::action("a")]);
        let second = Dialogue::new("alice", vec![Event::action("a"), Event::action("b")]);
        assert!(store.save(&first).await.is_ok());
        assert!(store.save(&second).await.is_ok());

        assert_eq!(store.len().await, 1);
        let loaded = store.retrieve("alice").await.ok().flatten();
        assert_eq!(loaded.map(|d| d.len()), Some(2));
    }

    #[tokio::test]
    async fn keys_lists_every_sender() {
        let store = MemoryStore::new();
        for id in ["b", "a", "c"] {
            assert!(store.save(&Dialogue::new(id, Vec::new())).await.is_ok());
        }
        let keys: Vec<String> = store.keys().await.into_iter().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
