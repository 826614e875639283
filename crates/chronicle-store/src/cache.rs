//! `Dragonfly` (Redis-compatible) tracker storage with optional expiry.
//!
//! Each conversation is one string value holding the encoded dialogue. When
//! a record expiry is configured every save resets the TTL, and an expired
//! record reads as absent.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `{prefix}conversation:{sender_id}` | String | Encoded dialogue |
//! | `{prefix}conversations` | Set | Sender ids saved through this prefix |
//!
//! The index set is what [`CacheStore::keys`] reads; ids whose record has
//! expired are pruned from it on the way.

use std::collections::BTreeSet;

use chronicle_types::Dialogue;
use fred::prelude::*;
use fred::types::Expiration;
use fred::types::config::ServerConfig;
use futures::future::try_join_all;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::serializer;

/// Default key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "chronicle:";

/// Default host when none is configured.
const DEFAULT_HOST: &str = "localhost";

/// Default Redis port.
const DEFAULT_PORT: u16 = 6379;

/// Connection handle to a `Dragonfly`/Redis instance storing dialogues.
#[derive(Clone)]
pub struct CacheStore {
    client: Client,
    record_exp: Option<u64>,
    key_prefix: String,
}

impl CacheStore {
    /// Connect using a store descriptor.
    ///
    /// `url` may be a full `redis://` URL or a bare host name; in the latter
    /// case `port`, `db`, `username` and `password` are applied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL or database index is invalid.
    /// Returns [`StoreError::Cache`] if the connection fails.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client_config = client_config(config)?;
        let client = Builder::from_config(client_config).build()?;
        client.init().await?;

        tracing::info!(
            record_exp = config.record_exp,
            "Connected to Dragonfly tracker store"
        );
        Ok(Self {
            client,
            record_exp: config.record_exp,
            key_prefix: config
                .key_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_owned()),
        })
    }

    /// Connect to a `redis://` URL with the given expiry and default prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the URL is invalid or the connection fails.
    pub async fn connect_url(url: &str, record_exp: Option<u64>) -> Result<Self, StoreError> {
        let config = StoreConfig {
            url: Some(url.to_owned()),
            record_exp,
            ..StoreConfig::of_kind("redis")
        };
        Self::connect(&config).await
    }

    /// Store the dialogue, resetting its expiry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if encoding fails.
    /// Returns [`StoreError::Cache`] if the write fails.
    pub async fn save(&self, dialogue: &Dialogue) -> Result<(), StoreError> {
        let key = self.record_key(&dialogue.sender_id);
        let encoded = serializer::encode_dialogue(dialogue)?;
        let expiration = expiration(self.record_exp);

        let _: () = self
            .client
            .set(key.as_str(), encoded.as_str(), expiration, None, false)
            .await?;
        let _: u32 = self
            .client
            .sadd(self.index_key().as_str(), dialogue.sender_id.as_str())
            .await?;

        debug!(sender_id = %dialogue.sender_id, key, "stored dialogue in cache");
        Ok(())
    }

    /// Read the dialogue for `sender_id`; `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Cache`] if the read fails, or a serializer error
    /// if the stored record is corrupt.
    pub async fn retrieve(&self, sender_id: &str) -> Result<Option<Dialogue>, StoreError> {
        let value: Option<String> = self.client.get(self.record_key(sender_id).as_str()).await?;
        value
            .map(|encoded| serializer::decode_dialogue(encoded.as_bytes()))
            .transpose()
    }

    /// Every sender id with a live record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Cache`] if a read fails.
    pub async fn keys(&self) -> Result<BTreeSet<String>, StoreError> {
        let index_key = self.index_key();
        let members: Vec<String> = self.client.smembers(index_key.as_str()).await?;

        let checks = members.iter().map(|sender_id| async move {
            let exists: u32 = self
                .client
                .exists(self.record_key(sender_id).as_str())
                .await?;
            Ok::<_, StoreError>(exists > 0)
        });
        let alive = try_join_all(checks).await?;

        let mut live = BTreeSet::new();
        let mut expired = Vec::new();
        for (sender_id, alive) in members.into_iter().zip(alive) {
            if alive {
                live.insert(sender_id);
            } else {
                expired.push(sender_id);
            }
        }

        if !expired.is_empty() {
            let count = expired.len();
            let _: u32 = self.client.srem(index_key.as_str(), expired).await?;
            debug!(count, "pruned expired conversations from index");
        }
        Ok(live)
    }

    /// Configured record expiry in seconds.
    pub const fn record_exp(&self) -> Option<u64> {
        self.record_exp
    }

    fn record_key(&self, sender_id: &str) -> String {
        record_key(&self.key_prefix, sender_id)
    }

    fn index_key(&self) -> String {
        index_key(&self.key_prefix)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("record_exp", &self.record_exp)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

/// Key holding the dialogue of `sender_id`.
fn record_key(prefix: &str, sender_id: &str) -> String {
    format!("{prefix}conversation:{sender_id}")
}

/// Key of the set of known sender ids.
fn index_key(prefix: &str) -> String {
    format!("{prefix}conversations")
}

/// `SET` expiry for a record; zero means the record never expires.
fn expiration(record_exp: Option<u64>) -> Option<Expiration> {
    record_exp
        .filter(|secs| *secs > 0)
        .map(|secs| Expiration::EX(i64::try_from(secs).unwrap_or(i64::MAX)))
}

/// Translate a store descriptor into a `fred` client configuration.
fn client_config(config: &StoreConfig) -> Result<Config, StoreError> {
    if let Some(url) = config.url.as_deref() {
        if url.starts_with("redis://") || url.starts_with("rediss://") {
            return Config::from_url(url)
                .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")));
        }
    }

    let host = config.url.as_deref().unwrap_or(DEFAULT_HOST);
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let database = config
        .db
        .as_deref()
        .map(str::parse::<u8>)
        .transpose()
        .map_err(|e| StoreError::Config(format!("cache db must be a small integer: {e}")))?;

    Ok(Config {
        server: ServerConfig::new_centralized(host, port),
        username: config.username.clone(),
        password: config.password.clone(),
        database,
        ..Config::default()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(record_key("chronicle:", "alice"), "chronicle:conversation:alice");
        assert_eq!(index_key("chronicle:"), "chronicle:conversations");
        // A sender literally named like the index never collides with it.
        assert_ne!(record_key("p:", "s"), index_key("p:"));
    }

    #[test]
    fn zero_record_exp_never_expires() {
        assert!(expiration(None).is_none());
        assert!(expiration(Some(0)).is_none());
        assert!(matches!(expiration(Some(3600)), Some(Expiration::EX(3600))));
        assert!(matches!(expiration(Some(u64::MAX)), Some(Expiration::EX(i64::MAX))));
    }

    #[test]
    fn client_config_from_url() {
        let store = StoreConfig {
            url: Some("redis://cache.internal:6380/2".to_owned()),
            ..StoreConfig::of_kind("redis")
        };
        let config = client_config(&store).unwrap();
        assert_eq!(config.database, Some(2));
    }

    #[test]
    fn client_config_from_host_and_parts() {
        let store = StoreConfig {
            url: Some("cache.internal".to_owned()),
            port: Some(6390),
            db: Some("3".to_owned()),
            password: Some("hunter2".to_owned()),
            ..StoreConfig::of_kind("redis")
        };
        let config = client_config(&store).unwrap();
        assert_eq!(config.database, Some(3));
        assert_eq!(config.password.as_deref(), Some("hunter2"));
        assert_eq!(config.server, ServerConfig::new_centralized("cache.internal", 6390));
    }

    #[test]
    fn client_config_rejects_bad_db_index() {
        let store = StoreConfig {
            db: Some("sessions".to_owned()),
            ..StoreConfig::of_kind("redis")
        };
        assert!(matches!(client_config(&store), Err(StoreError::Config(_))));
    }
}
