//! Document tracker storage on `PostgreSQL` JSONB.
//!
//! One row per conversation in a collection table; the row's `document`
//! column holds `{"sender_id": "...", "events": [...]}`. Saves replace the
//! whole document, keyed by a unique expression index on the sender id.
//!
//! Collections written by older deployments may store the sender id as a
//! JSON number. A lookup that misses by string falls back to the numeric
//! form and rewrites the matching document's id to a string in the same
//! statement, so the migration happens once per conversation.

use std::collections::BTreeSet;

use chronicle_types::Dialogue;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::postgres::{self, PostgresConfig};

/// Default collection name.
pub const DEFAULT_COLLECTION: &str = "conversations";

/// Conversation documents in a JSONB collection table.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    pool: PgPool,
    collection: String,
}

impl DocumentStore {
    /// Connect (with bootstrap retries) and create the collection if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for an invalid collection name or
    /// connection settings, and the errors of
    /// [`postgres::connect_with_retry`].
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let collection = collection_name(config)?;
        let pg = PostgresConfig::from_store_config(config)?;
        let pool = postgres::connect_with_retry(&pg, &schema(&collection)).await?;
        info!(collection, "Document tracker store ready");
        Ok(Self { pool, collection })
    }

    /// Wrap an existing pool, creating the collection if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for an invalid collection name and
    /// [`StoreError::Postgres`] if the schema cannot be applied.
    pub async fn from_pool(pool: PgPool, collection: &str) -> Result<Self, StoreError> {
        postgres::validate_identifier(collection)?;
        postgres::run_schema(&pool, &schema(collection)).await?;
        Ok(Self {
            pool,
            collection: collection.to_owned(),
        })
    }

    /// Replace the conversation's document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the dialogue cannot be
    /// encoded and [`StoreError::Postgres`] if the write fails.
    pub async fn save(&self, dialogue: &Dialogue) -> Result<(), StoreError> {
        let document = serde_json::to_value(dialogue)?;
        sqlx::query(&format!(
            r"INSERT INTO {table} (document) VALUES ($1)
              ON CONFLICT ((document->>'sender_id'))
              DO UPDATE SET document = EXCLUDED.document",
            table = self.collection
        ))
        .bind(&document)
        .execute(&self.pool)
        .await?;

        debug!(
            sender_id = %dialogue.sender_id,
            events = dialogue.len(),
            "replaced conversation document"
        );
        Ok(())
    }

    /// Load the conversation's document, migrating a numeric id if found.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if a query fails and
    /// [`StoreError::Serialization`] if the document is malformed.
    pub async fn retrieve(&self, sender_id: &str) -> Result<Option<Dialogue>, StoreError> {
        let found: Option<serde_json::Value> = sqlx::query_scalar(&lookup_sql(&self.collection))
        .bind(sender_id)
        .fetch_optional(&self.pool)
        .await?;

        let document = match (found, legacy_numeric_id(sender_id)) {
            (Some(document), _) => Some(document),
            (None, Some(numeric)) => self.migrate_numeric_id(sender_id, numeric).await?,
            (None, None) => None,
        };

        document
            .map(|document| {
                let mut dialogue: Dialogue = serde_json::from_value(document)?;
                sender_id.clone_into(&mut dialogue.sender_id);
                Ok(dialogue)
            })
            .transpose()
    }

    /// Sender ids of every stored document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the query fails.
    pub async fn keys(&self) -> Result<BTreeSet<String>, StoreError> {
        let ids: Vec<Option<String>> = sqlx::query_scalar(&format!(
            "SELECT document->>'sender_id' FROM {table}",
            table = self.collection
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().flatten().collect())
    }

    /// Return a reference to the underlying connection pool.
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The collection table name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Rewrite a numeric sender id to its string form, returning the
    /// migrated document.
    async fn migrate_numeric_id(
        &self,
        sender_id: &str,
        numeric: i64,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let migrated: Option<serde_json::Value> = sqlx::query_scalar(&format!(
            r"UPDATE {table}
              SET document = jsonb_set(document, '{{sender_id}}', to_jsonb($1::text))
              WHERE document->'sender_id' = to_jsonb($2::bigint)
              RETURNING document",
            table = self.collection
        ))
        .bind(sender_id)
        .bind(numeric)
        .fetch_optional(&self.pool)
        .await?;

        if migrated.is_some() {
            info!(sender_id, "migrated numeric sender id to string");
        }
        Ok(migrated)
    }
}

/// Statements creating the collection and its sender id index.
fn schema(collection: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {collection} (
                id BIGSERIAL PRIMARY KEY,
                document JSONB NOT NULL
            )"
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {collection}_sender_id_idx
             ON {collection} ((document->>'sender_id'))"
        ),
    ]
}

/// Lookup of a string sender id through the `sender_id` expression index.
///
/// Numeric ids share the index key (`->>` renders both as text) and are
/// excluded here so they reach the migration path.
pub fn lookup_sql(collection: &str) -> String {
    format!(
        r"SELECT document FROM {collection}
          WHERE document->>'sender_id' = $1
            AND jsonb_typeof(document->'sender_id') = 'string'"
    )
}

fn collection_name(config: &StoreConfig) -> Result<String, StoreError> {
    let name = config
        .collection
        .clone()
        .unwrap_or_else(|| DEFAULT_COLLECTION.to_owned());
    postgres::validate_identifier(&name)?;
    Ok(name)
}

/// The numeric form a sender id may have been stored under, if any.
///
/// Only plain decimal digits qualify: `"042"` would have been stored as 42
/// and is not a legacy id, neither is `"+5"` or `" 5"`.
fn legacy_numeric_id(sender_id: &str) -> Option<i64> {
    let canonical = !sender_id.is_empty()
        && sender_id.bytes().all(|b| b.is_ascii_digit())
        && (sender_id == "0" || !sender_id.starts_with('0'));
    if canonical {
        sender_id.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_ids_are_plain_decimal_integers() {
        assert_eq!(legacy_numeric_id("42"), Some(42));
        assert_eq!(legacy_numeric_id("0"), Some(0));
        assert_eq!(legacy_numeric_id("042"), None);
        assert_eq!(legacy_numeric_id("-3"), None);
        assert_eq!(legacy_numeric_id("+5"), None);
        assert_eq!(legacy_numeric_id("alice"), None);
        assert_eq!(legacy_numeric_id(""), None);
        // Too large for a JSON integer column.
        assert_eq!(legacy_numeric_id("99999999999999999999"), None);
    }

    #[test]
    fn collection_defaults_and_validation() {
        let default = collection_name(&StoreConfig::of_kind("mongod"));
        assert_eq!(default.ok().as_deref(), Some(DEFAULT_COLLECTION));

        let bad = StoreConfig {
            collection: Some("drop table;".to_owned()),
            ..StoreConfig::of_kind("mongod")
        };
        assert!(matches!(collection_name(&bad), Err(StoreError::Config(_))));
    }

    #[test]
    fn schema_indexes_sender_id() {
        let statements = schema("dialogues");
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().any(|s| s.contains("CREATE UNIQUE INDEX")
            && s.contains("dialogues_sender_id_idx")
            && s.contains("(document->>'sender_id')")));
    }

    #[test]
    fn lookup_matches_the_indexed_expression() {
        let sql = lookup_sql("dialogues");
        assert!(sql.contains("FROM dialogues"));
        assert!(sql.contains("document->>'sender_id' = $1"));
        assert!(sql.contains("jsonb_typeof(document->'sender_id') = 'string'"));
    }
}
