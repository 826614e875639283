//! Slot schema used to rebuild derived tracker state.
//!
//! The domain is authored elsewhere and only read here. A minimal domain
//! file looks like:
//!
//! ```yaml
//! slots:
//!   cuisine:
//!     type: text
//!   people:
//!     type: float
//!     initial_value: 2
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors that can occur when loading a domain.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// Failed to read the domain file from disk.
    #[error("failed to read domain file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse domain YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        #[from]
        source: serde_yml::Error,
    },
}

/// Declaration of a single slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDefinition {
    /// Slot type name as authored (`text`, `float`, `list`, ...).
    ///
    /// Informational only; values are stored as JSON regardless of type.
    #[serde(default, rename = "type")]
    pub slot_type: Option<String>,

    /// Value the slot holds at the start of a conversation and after a reset.
    #[serde(default)]
    pub initial_value: Value,
}

/// Read-only schema of the slots a conversation can fill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Known slots by name.
    #[serde(default)]
    pub slots: BTreeMap<String, SlotDefinition>,
}

impl Domain {
    /// Load a domain from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Io`] if the file cannot be read, or
    /// [`DomainError::Yaml`] if the content is not a valid domain.
    pub fn from_file(path: &Path) -> Result<Self, DomainError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse a domain from a YAML string.
    ///
    /// An empty document yields a domain without slots.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Yaml`] if the string is not a valid domain.
    pub fn parse(yaml: &str) -> Result<Self, DomainError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Builder-style slot declaration, mostly for tests and embedding.
    #[must_use]
    pub fn with_slot(mut self, name: &str, initial_value: Value) -> Self {
        self.slots.insert(
            name.to_owned(),
            SlotDefinition {
                slot_type: None,
                initial_value,
            },
        );
        self
    }

    /// Whether a slot with this name is declared.
    pub fn has_slot(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Every declared slot mapped to its initial value.
    pub fn initial_slot_values(&self) -> BTreeMap<String, Value> {
        self.slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.initial_value.clone()))
            .collect()
    }
}
