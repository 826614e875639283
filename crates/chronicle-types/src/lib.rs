//! Shared type definitions for Chronicle conversation persistence.
//!
//! These types describe a conversation as an ordered event log. Storage
//! backends persist the [`Dialogue`] projection; the [`Tracker`] rebuilds
//! derived state from it using a [`Domain`].
//!
//! # Modules
//!
//! - [`event`] -- Immutable timestamped conversation events
//! - [`tracker`] -- Live trackers and their persisted dialogue projection
//! - [`domain`] -- Slot schema used to rebuild derived state

pub mod domain;
pub mod event;
pub mod tracker;

// Re-export primary types for convenience.
pub use domain::{Domain, DomainError, SlotDefinition};
pub use event::{ACTION_LISTEN_NAME, Event, EventKind, next_timestamp};
pub use tracker::{Dialogue, Tracker};
