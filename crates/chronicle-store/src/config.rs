//! Configuration loading and typed config structures.
//!
//! Configuration lives in a YAML file. This module defines strongly-typed
//! structs that mirror the YAML structure and a loader that reads it:
//!
//! ```yaml
//! domain: domain.yml
//! max_event_history: 20
//! tracker_store:
//!   type: sql
//!   url: localhost
//!   db: chronicle
//!   username: chronicle
//!   password: secret
//!   login_db: postgres
//! event_broker:
//!   type: nats
//!   url: nats://localhost:4222
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chronicle_types::Domain;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::postgres::RetryPolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        #[from]
        source: serde_yml::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChronicleConfig {
    /// Path to the domain file. Without it trackers cannot be rebuilt.
    #[serde(default)]
    pub domain: Option<PathBuf>,

    /// Upper bound on events retained by trackers handed out by the store.
    #[serde(default)]
    pub max_event_history: Option<usize>,

    /// Tracker store selection. Missing means in-memory.
    #[serde(default)]
    pub tracker_store: Option<StoreConfig>,

    /// Optional event stream for newly saved events.
    #[serde(default)]
    pub event_broker: Option<BrokerConfig>,
}

impl ChronicleConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `CHRONICLE_STORE_URL` overrides `tracker_store.url`
    /// - `CHRONICLE_STORE_PASSWORD` overrides `tracker_store.password`
    /// - `NATS_URL` overrides `event_broker.url`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the parsed values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(store) = self.tracker_store.as_mut() {
            if let Ok(val) = std::env::var("CHRONICLE_STORE_URL") {
                store.url = Some(val);
            }
            if let Ok(val) = std::env::var("CHRONICLE_STORE_PASSWORD") {
                store.password = Some(val);
            }
        }
        if let Some(broker) = self.event_broker.as_mut() {
            if let Ok(val) = std::env::var("NATS_URL") {
                broker.url = val;
            }
        }
    }

    /// Load the configured domain, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Domain`] if the file is configured but unreadable.
    pub fn load_domain(&self) -> Result<Option<Domain>, StoreError> {
        self.domain
            .as_deref()
            .map(Domain::from_file)
            .transpose()
            .map_err(StoreError::from)
    }
}

/// Tracker store descriptor.
///
/// Which fields apply depends on `type`; unused fields are ignored. Keys not
/// listed here are kept in [`StoreConfig::extra`] for custom stores.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StoreConfig {
    /// Backend kind: `memory`, `redis`, `mongod`, `sql`, or a custom name.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    /// Host name, or a full connection URL (`redis://`, `postgresql://`).
    #[serde(default)]
    pub url: Option<String>,

    /// Server port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name (relational/document) or index (cache).
    #[serde(default)]
    pub db: Option<String>,

    /// Login user.
    #[serde(default)]
    pub username: Option<String>,

    /// Login password.
    #[serde(default)]
    pub password: Option<String>,

    /// Document collection (table) name.
    #[serde(default)]
    pub collection: Option<String>,

    /// Relational events table name.
    #[serde(default)]
    pub table: Option<String>,

    /// Cache record expiry in seconds.
    #[serde(default)]
    pub record_exp: Option<u64>,

    /// Cache key prefix.
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// SQL dialect. Only `postgresql` is supported.
    #[serde(default)]
    pub dialect: Option<String>,

    /// Administrative database to connect through when the target database
    /// may not exist yet.
    #[serde(default)]
    pub login_db: Option<String>,

    /// Connection bootstrap retry settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Any other keys, passed through to custom stores.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoreConfig {
    /// Descriptor for a given kind with every other field unset.
    pub fn of_kind(kind: &str) -> Self {
        Self {
            kind: Some(kind.to_owned()),
            ..Self::default()
        }
    }
}

/// Bootstrap retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Delay between connection attempts in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub interval_ms: u64,

    /// Give up after this many attempts. Unset retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl RetryConfig {
    /// The retry policy these settings describe.
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(self.interval_ms),
            max_attempts: self.max_attempts,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_retry_interval_ms(),
            max_attempts: None,
        }
    }
}

/// Event stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerConfig {
    /// Broker kind. Only `nats` is supported.
    #[serde(default = "default_broker_kind", rename = "type")]
    pub kind: String,

    /// Broker URL.
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Subject events are published on.
    #[serde(default = "default_broker_subject")]
    pub subject: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: default_broker_kind(),
            url: default_broker_url(),
            subject: default_broker_subject(),
        }
    }
}

const fn default_retry_interval_ms() -> u64 {
    5_000
}

fn default_broker_kind() -> String {
    "nats".to_owned()
}

fn default_broker_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_broker_subject() -> String {
    "chronicle.events".to_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn default_config_is_in_memory() {
        let config = ChronicleConfig::default();
        assert!(config.tracker_store.is_none());
        assert!(config.event_broker.is_none());
        assert!(config.domain.is_none());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
domain: "domain.yml"
max_event_history: 25
tracker_store:
  type: sql
  url: "db.internal"
  port: 5433
  db: chronicle
  username: bot
  table: dialogue_events
  dialect: postgresql
  login_db: postgres
  retry:
    interval_ms: 250
    max_attempts: 4
event_broker:
  type: nats
  subject: "bot.events"
"#;
        let config = ChronicleConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let config = config.unwrap_or_default();

        assert_eq!(config.domain.as_deref(), Some(Path::new("domain.yml")));
        assert_eq!(config.max_event_history, Some(25));

        let store = config.tracker_store.unwrap_or_default();
        assert_eq!(store.kind.as_deref(), Some("sql"));
        assert_eq!(store.port, Some(5433));
        assert_eq!(store.table.as_deref(), Some("dialogue_events"));
        assert_eq!(store.login_db.as_deref(), Some("postgres"));
        assert_eq!(
            store.retry.policy(),
            RetryPolicy {
                interval: Duration::from_millis(250),
                max_attempts: Some(4),
            }
        );
        assert!(store.extra.is_empty());

        let broker = config.event_broker.unwrap_or_default();
        assert_eq!(broker.kind, "nats");
        assert_eq!(broker.subject, "bot.events");
    }

    #[test]
    fn unknown_store_keys_are_kept_for_custom_stores() {
        let yaml = r"
tracker_store:
  type: my_company.StoreKind
  url: anywhere
  shard_count: 4
  region: eu
";
        let config = ChronicleConfig::parse(yaml).unwrap_or_default();
        let store = config.tracker_store.unwrap_or_default();
        assert_eq!(store.kind.as_deref(), Some("my_company.StoreKind"));
        assert_eq!(store.extra.get("shard_count"), Some(&json!(4)));
        assert_eq!(store.extra.get("region"), Some(&json!("eu")));
    }

    #[test]
    fn retry_defaults_to_unbounded_five_seconds() {
        let retry = RetryConfig::default();
        assert_eq!(retry.interval_ms, 5_000);
        assert_eq!(retry.max_attempts, None);
    }

    #[test]
    fn parse_empty_yaml() {
        let config = ChronicleConfig::parse("");
        assert!(config.is_ok());
    }

    #[test]
    fn parse_rejects_bad_yaml() {
        let config = ChronicleConfig::parse("tracker_store: [oops");
        assert!(matches!(config, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn no_domain_configured_loads_none() {
        let config = ChronicleConfig::default();
        assert!(matches!(config.load_domain(), Ok(None)));
    }

    #[test]
    fn missing_domain_file_is_an_error() {
        let config = ChronicleConfig {
            domain: Some(PathBuf::from("/no/such/domain.yml")),
            ..ChronicleConfig::default()
        };
        assert!(matches!(config.load_domain(), Err(StoreError::Domain(_))));
    }
}
