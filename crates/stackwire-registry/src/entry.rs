//! Parameter entries and the persisted registry snapshot.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackwire_common::constants::STATE_VERSION;

/// A named value produced by a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterEntry {
    /// Name, unique within the owning stack.
    pub name: String,
    /// Exported value.
    pub value: String,
    /// Cross-stack export name, unique across all stacks.
    pub export_name: Option<String>,
    /// Free-form description carried from the output declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Incremented every time the value changes.
    pub version: u64,
    /// Last time the value changed.
    pub updated_at: DateTime<Utc>,
}

/// Owner of an export name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOwner {
    /// Stack that exports the name.
    pub stack: String,
    /// Entry name within that stack.
    pub entry: String,
}

/// Full registry content, as persisted by a [`ParameterStore`](crate::ParameterStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Document version.
    pub version: u32,
    /// Entries keyed by stack, then by entry name.
    pub stacks: BTreeMap<String, BTreeMap<String, ParameterEntry>>,
    /// Export name to owning entry.
    pub exports: BTreeMap<String, ExportOwner>,
    /// Export name to the live stacks importing it.
    pub importers: BTreeMap<String, BTreeSet<String>>,
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            stacks: BTreeMap::new(),
            exports: BTreeMap::new(),
            importers: BTreeMap::new(),
        }
    }
}

impl RegistrySnapshot {
    /// Returns the entry behind an export name.
    #[must_use]
    pub fn exported(&self, export_name: &str) -> Option<&ParameterEntry> {
        let owner = self.exports.get(export_name)?;
        self.stacks.get(&owner.stack)?.get(&owner.entry)
    }

    /// Returns the live importers of an export, sorted by name.
    #[must_use]
    pub fn importers_of(&self, export_name: &str) -> Vec<String> {
        self.importers
            .get(export_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}
