//! Relational tracker storage: one `PostgreSQL` row per event.
//!
//! Rows are append-only. A save inserts only the events newer than the
//! latest timestamp already stored for the conversation, so saving the same
//! tracker twice writes nothing the second time. Retrieval orders rows by
//! `(timestamp, id)`.
//!
//! The events table carries the denormalised `intent_name` and
//! `action_name` columns for ad-hoc querying; the full event is kept in
//! `data`.

use std::collections::BTreeSet;

use chronicle_types::{Dialogue, Event};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::postgres::{self, PostgresConfig};

/// Default events table name.
pub const DEFAULT_TABLE: &str = "events";

/// Event rows in a relational table.
#[derive(Debug, Clone)]
pub struct RelationalStore {
    pool: PgPool,
    table: String,
}

impl RelationalStore {
    /// Connect (creating the database through `login_db` when configured)
    /// and create the events table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for an unsupported dialect or invalid
    /// table name, and the errors of [`postgres::connect_with_retry`].
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let table = table_name(config)?;
        let pg = PostgresConfig::from_store_config(config)?;
        let pool = postgres::connect_with_retry(&pg, &schema(&table)).await?;
        info!(table, "Relational tracker store ready");
        Ok(Self { pool, table })
    }

    /// Wrap an existing pool, creating the events table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for an invalid table name and
    /// [`StoreError::Postgres`] if the schema cannot be applied.
    pub async fn from_pool(pool: PgPool, table: &str) -> Result<Self, StoreError> {
        postgres::validate_identifier(table)?;
        postgres::run_schema(&pool, &schema(table)).await?;
        Ok(Self {
            pool,
            table: table.to_owned(),
        })
    }

    /// Append the events not yet stored for this conversation.
    ///
    /// Reading the stored maximum and inserting happen in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if a query fails.
    pub async fn save(&self, dialogue: &Dialogue) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let stored_max: Option<f64> = sqlx::query_scalar(&format!(
            "SELECT MAX(timestamp) FROM {table} WHERE sender_id = $1",
            table = self.table
        ))
        .bind(&dialogue.sender_id)
        .fetch_one(&mut *tx)
        .await?;

        let pending = stored_max.map_or(dialogue.events.as_slice(), |max| {
            events_after(&dialogue.events, max)
        });
        if pending.is_empty() {
            tx.commit().await?;
            debug!(sender_id = %dialogue.sender_id, "no new events to store");
            return Ok(());
        }

        // Pre-allocate arrays for UNNEST-based batch insert.
        let len = pending.len();
        let mut sender_ids = Vec::with_capacity(len);
        let mut type_names = Vec::with_capacity(len);
        let mut timestamps = Vec::with_capacity(len);
        let mut intent_names: Vec<Option<String>> = Vec::with_capacity(len);
        let mut action_names: Vec<Option<String>> = Vec::with_capacity(len);
        let mut data = Vec::with_capacity(len);

        for event in pending {
            sender_ids.push(dialogue.sender_id.clone());
            type_names.push(event.type_name().to_owned());
            timestamps.push(event.timestamp());
            intent_names.push(event.intent_name().map(str::to_owned));
            action_names.push(event.action_name().map(str::to_owned));
            data.push(event.to_value());
        }

        sqlx::query(&format!(
            r"INSERT INTO {table} (sender_id, type_name, timestamp, intent_name, action_name, data)
              SELECT * FROM UNNEST($1::TEXT[], $2::TEXT[], $3::DOUBLE PRECISION[], $4::TEXT[], $5::TEXT[], $6::JSONB[])",
            table = self.table
        ))
        .bind(&sender_ids)
        .bind(&type_names)
        .bind(&timestamps)
        .bind(&intent_names)
        .bind(&action_names)
        .bind(&data)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            sender_id = %dialogue.sender_id,
            count = len,
            "Inserted events (batch UNNEST)"
        );
        Ok(())
    }

    /// All events of a conversation in stored order; `None` if it has none.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the query fails and
    /// [`StoreError::Serialization`] if a stored event is malformed.
    pub async fn retrieve(&self, sender_id: &str) -> Result<Option<Dialogue>, StoreError> {
        let rows = self.rows(sender_id).await?;
        if rows.is_empty() {
            debug!(sender_id, "no stored events");
            return Ok(None);
        }

        let events = rows
            .into_iter()
            .map(EventRow::into_event)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(sender_id, count = events.len(), "recreating dialogue from rows");
        Ok(Some(Dialogue::new(sender_id, events)))
    }

    /// Distinct sender ids with at least one stored event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the query fails.
    pub async fn keys(&self) -> Result<BTreeSet<String>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT DISTINCT sender_id FROM {table}",
            table = self.table
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    /// Raw rows of a conversation ordered by `(timestamp, id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the query fails.
    pub async fn rows(&self, sender_id: &str) -> Result<Vec<EventRow>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r"SELECT id, sender_id, type_name, timestamp, intent_name, action_name, data
              FROM {table}
              WHERE sender_id = $1
              ORDER BY timestamp, id",
            table = self.table
        ))
        .bind(sender_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Number of rows stored for a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the query fails.
    pub async fn count(&self, sender_id: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE sender_id = $1",
            table = self.table
        ))
        .bind(sender_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Return a reference to the underlying connection pool.
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// A row from the events table.
///
/// Uses runtime types rather than compile-time checked types to
/// avoid requiring a live database during builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Auto-incremented row ID.
    pub id: i64,
    /// Conversation the event belongs to.
    pub sender_id: String,
    /// Event type tag.
    pub type_name: String,
    /// Event timestamp in seconds.
    pub timestamp: f64,
    /// Intent of a user event.
    pub intent_name: Option<String>,
    /// Action of an action event.
    pub action_name: Option<String>,
    /// The full serialized event.
    pub data: serde_json::Value,
}

impl EventRow {
    /// Decode the stored event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if `data` is not an event.
    pub fn into_event(self) -> Result<Event, StoreError> {
        Ok(serde_json::from_value(self.data)?)
    }
}

/// The suffix of `events` newer than the stored maximum timestamp.
///
/// Scans from the end for the last event at or before `stored_max`; every
/// event after it is new. Events are assumed to be appended in timestamp
/// order, so an out-of-order event older than the stored maximum is
/// treated as already stored.
pub fn events_after(events: &[Event], stored_max: f64) -> &[Event] {
    let start = events
        .iter()
        .rposition(|event| event.timestamp() <= stored_max)
        .map_or(0, |idx| idx.saturating_add(1));
    events.get(start..).unwrap_or_default()
}

/// Statements creating the events table and its lookup index.
fn schema(table: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                sender_id TEXT NOT NULL,
                type_name TEXT NOT NULL,
                timestamp DOUBLE PRECISION NOT NULL,
                intent_name TEXT,
                action_name TEXT,
                data JSONB NOT NULL
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {table}_sender_id_timestamp_idx
             ON {table} (sender_id, timestamp)"
        ),
    ]
}

fn table_name(config: &StoreConfig) -> Result<String, StoreError> {
    let name = config
        .table
        .clone()
        .unwrap_or_else(|| DEFAULT_TABLE.to_owned());
    postgres::validate_identifier(&name)?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    fn at(ts: f64) -> Event {
        Event::with_timestamp("action", ts, Map::new())
    }

    fn stamps(events: &[Event]) -> Vec<f64> {
        events.iter().map(Event::timestamp).collect()
    }

    #[test]
    fn nothing_stored_keeps_everything() {
        let events = vec![at(1.0), at(2.0)];
        assert_eq!(stamps(events_after(&events, 0.0)), vec![1.0, 2.0]);
    }

    #[test]
    fn only_the_appended_event_is_new() {
        let events = vec![at(1.0), at(2.0), at(3.0), at(4.0)];
        assert_eq!(stamps(events_after(&events, 3.0)), vec![4.0]);
    }

    #[test]
    fn resaving_the_same_events_writes_nothing() {
        let events = vec![at(1.0), at(2.0), at(3.0)];
        assert!(events_after(&events, 3.0).is_empty());
    }

    #[test]
    fn stored_max_beyond_every_event_writes_nothing() {
        let events = vec![at(1.0), at(2.0)];
        assert!(events_after(&events, 10.0).is_empty());
        assert!(events_after(&[], 1.0).is_empty());
    }

    #[test]
    fn older_events_before_the_boundary_are_not_rewritten() {
        // A late event with an old timestamp sits before newer ones.
        let events = vec![at(1.0), at(5.0), at(2.0), at(6.0)];
        assert_eq!(stamps(events_after(&events, 5.0)), vec![6.0]);
    }

    #[test]
    fn table_defaults_and_validation() {
        let default = table_name(&StoreConfig::of_kind("sql"));
        assert_eq!(default.ok().as_deref(), Some(DEFAULT_TABLE));

        let bad = StoreConfig {
            table: Some("events; --".to_owned()),
            ..StoreConfig::of_kind("sql")
        };
        assert!(matches!(table_name(&bad), Err(StoreError::Config(_))));
    }

    #[test]
    fn row_decodes_to_event() {
        let event = Event::action("action_greet");
        let row = EventRow {
            id: 1,
            sender_id: "alice".to_owned(),
            type_name: "action".to_owned(),
            timestamp: event.timestamp(),
            intent_name: None,
            action_name: Some("action_greet".to_owned()),
            data: event.to_value(),
        };
        assert!(row.into_event().is_ok_and(|decoded| decoded == event));
    }
}
