//! Persistence seam for the parameter registry.
//!
//! The registry writes its full snapshot through a [`ParameterStore`] after
//! every mutation. Tests use [`MemoryParameterStore`]; deployments use
//! [`JsonFileParameterStore`] so exports survive across separate invocations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use stackwire_common::error::{Result, StackwireError};
use stackwire_common::persist;

use crate::entry::RegistrySnapshot;

/// Durable backing store for registry snapshots.
pub trait ParameterStore: Send + Sync + fmt::Debug {
    /// Loads the last saved snapshot, or an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be read.
    fn load(&self) -> Result<RegistrySnapshot>;

    /// Replaces the saved snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()>;
}

/// Process-local store. Share it behind an `Arc` to simulate separate
/// invocations against the same backing state.
#[derive(Debug, Default)]
pub struct MemoryParameterStore {
    snapshot: Mutex<RegistrySnapshot>,
}

impl MemoryParameterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParameterStore for MemoryParameterStore {
    fn load(&self) -> Result<RegistrySnapshot> {
        self.snapshot
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| poisoned())
    }

    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let mut guard = self.snapshot.lock().map_err(|_| poisoned())?;
        *guard = snapshot.clone();
        Ok(())
    }
}

/// JSON document store, one file per registry.
#[derive(Debug, Clone)]
pub struct JsonFileParameterStore {
    path: PathBuf,
}

impl JsonFileParameterStore {
    /// Creates a store persisting to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParameterStore for JsonFileParameterStore {
    fn load(&self) -> Result<RegistrySnapshot> {
        tracing::debug!(path = %self.path.display(), "loading registry");
        let snapshot: RegistrySnapshot = persist::read_json(&self.path)?.unwrap_or_default();
        if snapshot.version != stackwire_common::constants::STATE_VERSION {
            return Err(StackwireError::Config {
                message: format!(
                    "unsupported registry version {} in {}",
                    snapshot.version,
                    self.path.display()
                ),
            });
        }
        Ok(snapshot)
    }

    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        persist::write_json_atomic(&self.path, snapshot)
    }
}

fn poisoned() -> StackwireError {
    StackwireError::Config {
        message: "parameter store lock poisoned".into(),
    }
}
