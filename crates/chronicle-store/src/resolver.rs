//! Configuration-driven backend selection.
//!
//! Built-in kinds map to their drivers. Any other kind names a custom
//! driver looked up in a [`StoreRegistry`]; when no constructor is
//! registered under that name, or the constructor fails, the resolver logs a
//! warning and falls back to the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::{CustomStore, StoreBackend};
use crate::cache::CacheStore;
use crate::config::StoreConfig;
use crate::document::DocumentStore;
use crate::error::StoreError;
use crate::memory::MemoryStore;
use crate::relational::RelationalStore;

/// Constructor for a custom driver.
pub type StoreFactory =
    Arc<dyn Fn(&StoreConfig) -> Result<Box<dyn CustomStore>, StoreError> + Send + Sync>;

/// Backend kind named by a store descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// `memory`, `in_memory`, or no kind at all.
    Memory,
    /// `redis` or `cache`.
    Cache,
    /// `mongod`, `mongo` or `document`.
    Document,
    /// `sql` or `relational`.
    Relational,
    /// Anything else: the name of a registered custom driver.
    Custom(String),
}

impl StoreKind {
    /// Classify a descriptor's `type` value. Matching ignores ASCII case.
    pub fn parse(kind: Option<&str>) -> Self {
        let Some(kind) = kind else {
            return Self::Memory;
        };
        match kind.to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Self::Memory,
            "redis" | "cache" => Self::Cache,
            "mongod" | "mongo" | "document" => Self::Document,
            "sql" | "relational" => Self::Relational,
            _ => Self::Custom(kind.to_owned()),
        }
    }
}

/// Named constructors for custom drivers.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous entry.
    #[must_use]
    pub fn register<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&StoreConfig) -> Result<Box<dyn CustomStore>, StoreError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Look up the constructor registered under `name`.
    pub fn get(&self, name: &str) -> Option<&StoreFactory> {
        self.factories.get(name)
    }

    /// Registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("StoreRegistry")
            .field("factories", &names)
            .finish()
    }
}

/// Builds a [`StoreBackend`] from configuration.
#[derive(Debug, Clone, Default)]
pub struct StoreResolver {
    registry: StoreRegistry,
}

impl StoreResolver {
    /// A resolver with no custom drivers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver that also knows the drivers in `registry`.
    pub const fn with_registry(registry: StoreRegistry) -> Self {
        Self { registry }
    }

    /// Construct the backend described by `config`.
    ///
    /// A missing descriptor yields the in-memory store. Custom kinds never
    /// fail: an unknown name or a failing constructor falls back to memory.
    ///
    /// # Errors
    ///
    /// Built-in drivers propagate their connection errors, e.g.
    /// [`StoreError::Bootstrap`] once the retry policy is exhausted.
    pub async fn resolve(&self, config: Option<&StoreConfig>) -> Result<StoreBackend, StoreError> {
        let Some(config) = config else {
            info!("no tracker store configured, using in-memory store");
            return Ok(StoreBackend::Memory(MemoryStore::new()));
        };

        let backend = match StoreKind::parse(config.kind.as_deref()) {
            StoreKind::Memory => StoreBackend::Memory(MemoryStore::new()),
            StoreKind::Cache => StoreBackend::Cache(CacheStore::connect(config).await?),
            StoreKind::Document => StoreBackend::Document(DocumentStore::connect(config).await?),
            StoreKind::Relational => {
                StoreBackend::Relational(RelationalStore::connect(config).await?)
            }
            StoreKind::Custom(name) => self.resolve_custom(&name, config),
        };

        info!(backend = backend.name(), "tracker store resolved");
        Ok(backend)
    }

    /// Instantiate a registered custom driver, degrading to memory.
    pub fn resolve_custom(&self, name: &str, config: &StoreConfig) -> StoreBackend {
        let Some(factory) = self.registry.get(name) else {
            warn!(
                kind = name,
                "no custom tracker store registered under this name, falling back to in-memory store"
            );
            return StoreBackend::Memory(MemoryStore::new());
        };

        match factory(config) {
            Ok(store) => StoreBackend::Custom(store),
            Err(e) => {
                warn!(
                    kind = name,
                    error = %e,
                    "custom tracker store failed to initialise, falling back to in-memory store"
                );
                StoreBackend::Memory(MemoryStore::new())
            }
        }
    }
}
