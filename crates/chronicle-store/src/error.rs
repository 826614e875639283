//! Error types for the tracker store.
//!
//! All errors are propagated via [`StoreError`] which wraps the underlying
//! [`sqlx`], [`fred`] and [`serde_json`] errors. "Not found" is never an
//! error: lookups of absent or expired records return `Ok(None)`.

use chronicle_types::DomainError;

/// Errors that can occur in the tracker store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `Dragonfly`/Redis operation failed.
    #[error("cache error: {0}")]
    Cache(#[from] fred::error::Error),

    /// Connecting to or publishing on NATS failed.
    #[error("NATS error: {0}")]
    Nats(String),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored dialogue uses a format version this build does not read.
    #[error("unsupported dialogue format version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the record.
        found: u32,
        /// Version this build writes and reads.
        supported: u32,
    },

    /// A tracker was needed but no domain is configured.
    #[error("no domain configured, cannot build tracker for sender '{sender_id}'")]
    MissingDomain {
        /// Conversation the tracker was requested for.
        sender_id: String,
    },

    /// The domain file could not be loaded.
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The database never became reachable within the retry policy.
    #[error("database bootstrap gave up after {attempts} attempts: {source}")]
    Bootstrap {
        /// Number of connection attempts made.
        attempts: u32,
        /// The error from the last attempt.
        #[source]
        source: sqlx::Error,
    },

    /// An externally supplied store failed.
    #[error("custom store error: {0}")]
    Custom(String),
}
