//! Conversation tracker persistence for Chronicle.
//!
//! A [`TrackerStore`] hands out trackers by sender id, creating them when
//! absent, and persists them through one of several backends. Newly saved
//! events can be mirrored to an event stream.
//!
//! # Architecture
//!
//! ```text
//! TrackerStore (get_or_create / retrieve / save / keys)
//!     |
//!     +-- EventStreamer (optional) --> NATS subject | channel
//!     |
//!     +-- StoreBackend
//!         |-- MemoryStore      (in-process, serialized dialogues)
//!         |-- CacheStore       (Dragonfly/Redis, optional TTL)
//!         |-- DocumentStore    (PostgreSQL JSONB, one document per sender)
//!         |-- RelationalStore  (PostgreSQL, one row per event)
//!         +-- Custom           (registered through StoreRegistry)
//! ```
//!
//! # Modules
//!
//! - [`tracker_store`] -- The facade over a backend
//! - [`backend`] -- Backend dispatch and the custom store trait
//! - [`resolver`] -- Configuration-driven backend selection
//! - [`memory`] -- In-process storage
//! - [`cache`] -- `Dragonfly` (Redis-compatible) storage with expiry
//! - [`document`] -- JSONB document storage
//! - [`relational`] -- Append-only event rows
//! - [`postgres`] -- `PostgreSQL` connection bootstrap and retry
//! - [`serializer`] -- Versioned dialogue encoding
//! - [`streamer`] -- Event stream publishing
//! - [`config`] -- YAML configuration
//! - [`error`] -- Shared error types

pub mod backend;
pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod relational;
pub mod resolver;
pub mod serializer;
pub mod streamer;
pub mod tracker_store;

// Re-export primary types for convenience.
pub use backend::{CustomStore, StoreBackend};
pub use cache::CacheStore;
pub use config::{BrokerConfig, ChronicleConfig, ConfigError, RetryConfig, StoreConfig};
pub use document::DocumentStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, RetryPolicy};
pub use relational::RelationalStore;
pub use resolver::{StoreFactory, StoreKind, StoreRegistry, StoreResolver};
pub use streamer::EventStreamer;
pub use tracker_store::TrackerStore;
