//! `PostgreSQL` connection bootstrap shared by the document and relational
//! stores.
//!
//! The database may take a while to come up, and may not even exist yet.
//! [`connect_with_retry`] keeps trying on transient failures at a fixed
//! interval, optionally creates the target database through an
//! administrative login database first, and then runs the caller's schema
//! statements. Schema races with other processes bootstrapping the same
//! database are tolerated: "already exists" errors are ignored.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! to avoid requiring a live database at build time.

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgConnection, PgPoolOptions};
use sqlx::{Connection, PgPool};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;

/// Default maximum number of connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default idle timeout in seconds.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default `PostgreSQL` port.
const DEFAULT_PORT: u16 = 5432;

/// Default database name.
const DEFAULT_DATABASE: &str = "chronicle";

/// Dialect names accepted for the relational store.
const SUPPORTED_DIALECTS: &[&str] = &["postgresql", "postgres", "postgresql+psycopg2"];

/// How connection bootstrap retries transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed delay between attempts.
    pub interval: Duration,
    /// Give up after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever at the given interval.
    pub const fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Retry at most `max_attempts` times at the given interval.
    pub const fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
        }
    }

    /// Whether `attempts` made so far uses up the policy.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(5))
    }
}

/// Configuration for a `PostgreSQL` connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Base connection options (host, port, credentials).
    pub options: PgConnectOptions,
    /// Database the stores live in.
    pub database: String,
    /// Administrative database used to create `database` if it is missing.
    pub login_db: Option<String>,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Bootstrap retry policy.
    pub retry: RetryPolicy,
}

impl PostgresConfig {
    /// Create a configuration from a `postgresql://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        let options: PgConnectOptions = url
            .parse()
            .map_err(|e: sqlx::Error| StoreError::Config(format!("Invalid database URL: {e}")))?;
        let database = options
            .get_database()
            .unwrap_or(DEFAULT_DATABASE)
            .to_owned();
        Ok(Self::with_options(options, database))
    }

    /// Build a configuration from a store descriptor.
    ///
    /// `url` may be a full `postgresql://` URL or a bare host name; `port`,
    /// `username`, `password` and `db` override whatever the URL carries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for unsupported dialects or unparsable
    /// URLs.
    pub fn from_store_config(config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(dialect) = config.dialect.as_deref() {
            let normalized = dialect.to_ascii_lowercase();
            if !SUPPORTED_DIALECTS.contains(&normalized.as_str()) {
                return Err(StoreError::Config(format!(
                    "unsupported SQL dialect '{dialect}', expected one of {SUPPORTED_DIALECTS:?}"
                )));
            }
        }

        let mut pg = match config.url.as_deref() {
            Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
                Self::from_url(url)?
            }
            Some(host) => Self::with_options(
                PgConnectOptions::new().host(host).port(DEFAULT_PORT),
                DEFAULT_DATABASE.to_owned(),
            ),
            None => Self::with_options(
                PgConnectOptions::new().port(DEFAULT_PORT),
                DEFAULT_DATABASE.to_owned(),
            ),
        };

        if let Some(port) = config.port {
            pg.options = pg.options.port(port);
        }
        if let Some(username) = config.username.as_deref() {
            pg.options = pg.options.username(username);
        }
        if let Some(password) = config.password.as_deref() {
            pg.options = pg.options.password(password);
        }
        if let Some(db) = config.db.as_deref() {
            db.clone_into(&mut pg.database);
        }
        pg.login_db.clone_from(&config.login_db);
        pg.retry = config.retry.policy();
        Ok(pg)
    }

    fn with_options(options: PgConnectOptions, database: String) -> Self {
        Self {
            options,
            database,
            login_db: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the bootstrap retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Connect through `login_db` and create the target database if missing.
    #[must_use]
    pub fn with_login_db(mut self, login_db: &str) -> Self {
        self.login_db = Some(login_db.to_owned());
        self
    }
}

/// Connect to `PostgreSQL`, bootstrapping the database and schema.
///
/// Transient failures (server unreachable, database missing or still
/// starting) are retried according to `config.retry`. Each attempt creates
/// the target database through `login_db` when configured, opens the pool,
/// and runs `schema` in order.
///
/// # Errors
///
/// Returns [`StoreError::Bootstrap`] when the retry policy is exhausted and
/// [`StoreError::Postgres`] for non-transient failures.
pub async fn connect_with_retry(
    config: &PostgresConfig,
    schema: &[String],
) -> Result<PgPool, StoreError> {
    debug!(
        database = config.database,
        login_db = config.login_db.as_deref(),
        "Attempting to connect to PostgreSQL"
    );

    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        match try_bootstrap(config, schema).await {
            Ok(pool) => {
                info!(
                    database = config.database,
                    attempts,
                    max_connections = config.max_connections,
                    "Connected to PostgreSQL"
                );
                return Ok(pool);
            }
            Err(e) if is_transient(&e) => {
                if config.retry.is_exhausted(attempts) {
                    return Err(StoreError::Bootstrap {
                        attempts,
                        source: e,
                    });
                }
                warn!(
                    error = %e,
                    attempts,
                    retry_in_ms = config.retry.interval.as_millis(),
                    "PostgreSQL not ready, retrying"
                );
                tokio::time::sleep(config.retry.interval).await;
            }
            Err(e) => return Err(StoreError::Postgres(e)),
        }
    }
}

/// One bootstrap attempt: database, pool, schema.
async fn try_bootstrap(config: &PostgresConfig, schema: &[String]) -> Result<PgPool, sqlx::Error> {
    if let Some(login_db) = config.login_db.as_deref() {
        ensure_database(config, login_db).await?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .connect_with(config.options.clone().database(&config.database))
        .await?;

    run_schema(&pool, schema).await?;
    Ok(pool)
}

/// Run schema statements, ignoring objects that already exist.
pub(crate) async fn run_schema(pool: &PgPool, schema: &[String]) -> Result<(), sqlx::Error> {
    for statement in schema {
        match sqlx::query(statement).execute(pool).await {
            Ok(_) => {}
            Err(e) if is_already_exists(&e) => {
                debug!(error = %e, "schema object already exists");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Create `config.database` through `login_db` unless it exists.
async fn ensure_database(config: &PostgresConfig, login_db: &str) -> Result<(), sqlx::Error> {
    let mut conn = PgConnection::connect_with(&config.options.clone().database(login_db)).await?;

    let exists: Option<i32> =
        sqlx::query_scalar("SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1")
            .bind(&config.database)
            .fetch_optional(&mut conn)
            .await?;

    if exists.is_none() {
        let statement = format!("CREATE DATABASE {}", quote_identifier(&config.database));
        match sqlx::query(&statement).execute(&mut conn).await {
            Ok(_) => info!(database = config.database, "Created database"),
            Err(e) if is_already_exists(&e) => {
                debug!(database = config.database, "database created concurrently");
            }
            Err(e) => return Err(e),
        }
    }

    conn.close().await
}

/// Whether an error is worth retrying during bootstrap.
///
/// Covers I/O failures, pool timeouts, a missing database (`3D000`), a
/// server still starting (`57P03`), too many connections (`53300`), and the
/// connection exception class (`08xxx`).
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            matches!(code.as_ref(), "3D000" | "57P03" | "53300") || code.starts_with("08")
        }),
        _ => false,
    }
}

/// Whether an error reports a schema object or database that already exists.
///
/// `23505` shows up when two sessions race on `CREATE ... IF NOT EXISTS`
/// and collide in the system catalogs.
pub fn is_already_exists(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            matches!(code.as_ref(), "42P04" | "42P06" | "42P07" | "42710" | "23505")
        }),
        _ => false,
    }
}

/// Check that a table or collection name is a plain SQL identifier.
///
/// Names are interpolated into DDL and queries, so only ASCII letters,
/// digits and underscores are accepted, not starting with a digit.
///
/// # Errors
///
/// Returns [`StoreError::Config`] for anything else.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(StoreError::Config(format!("invalid SQL identifier '{name}'")))
    }
}

/// Double-quote an identifier for DDL.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
