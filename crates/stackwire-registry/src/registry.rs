//! The cross-stack parameter registry.
//!
//! All reads and writes go through a reader/writer lock: many concurrent
//! `import`/`lookup` readers, or a single writer. Each mutation is applied to
//! a copy of the snapshot, written through the store, and only then made
//! visible, so a failed save leaves the registry unchanged.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use stackwire_common::error::{Result, StackwireError};
use stackwire_common::types::ResourceAddress;

use crate::entry::{ExportOwner, ParameterEntry, RegistrySnapshot};
use crate::store::{MemoryParameterStore, ParameterStore};

/// A value a stack wants to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParameter {
    /// Entry name, unique within the stack.
    pub name: String,
    /// Value to publish.
    pub value: String,
    /// Optional cross-stack export name.
    pub export_name: Option<String>,
    /// Optional description.
    pub description: Option<String>,
}

impl NewParameter {
    /// Creates a stack-local entry without an export name.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            export_name: None,
            description: None,
        }
    }

    /// Publishes the entry under a cross-stack export name.
    #[must_use]
    pub fn exported_as(mut self, export_name: impl Into<String>) -> Self {
        self.export_name = Some(export_name.into());
        self
    }
}

/// Registry of stack outputs and cross-stack exports.
#[derive(Debug)]
pub struct ParameterRegistry {
    state: RwLock<RegistrySnapshot>,
    store: Arc<dyn ParameterStore>,
}

impl ParameterRegistry {
    /// Opens a registry over `store`, loading its current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn open(store: Arc<dyn ParameterStore>) -> Result<Self> {
        let snapshot = store.load()?;
        tracing::debug!(
            exports = snapshot.exports.len(),
            stacks = snapshot.stacks.len(),
            "parameter registry opened"
        );
        Ok(Self {
            state: RwLock::new(snapshot),
            store,
        })
    }

    /// Creates an empty registry backed by a private in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(RegistrySnapshot::default()),
            store: Arc::new(MemoryParameterStore::new()),
        }
    }

    /// Publishes a value owned by `stack`. Returns the entry version.
    ///
    /// Re-exporting an unchanged value keeps the version; a changed value
    /// increments it.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::DuplicateExport`] if the export name belongs to
    /// a different stack, or [`StackwireError::ExportInUse`] if the entry drops
    /// an export name that is still imported.
    pub fn export(&self, stack: &str, parameter: NewParameter) -> Result<u64> {
        let version = self.mutate(|snapshot| apply_export(snapshot, stack, &parameter))?;
        tracing::info!(
            stack,
            name = %parameter.name,
            export = parameter.export_name.as_deref().unwrap_or("-"),
            version,
            "parameter exported"
        );
        Ok(version)
    }

    /// Resolves an export on behalf of `importer` and records its stack as a
    /// live consumer. Imports from the owning stack itself are not recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::UnresolvedReference`] if no live export exists.
    pub fn import(&self, importer: &ResourceAddress, export_name: &str) -> Result<String> {
        self.mutate(|snapshot| {
            let (owner, value) = match (
                snapshot.exports.get(export_name),
                snapshot.exported(export_name),
            ) {
                (Some(owner), Some(entry)) => (owner.stack.clone(), entry.value.clone()),
                _ => {
                    return Err(StackwireError::UnresolvedReference {
                        stack: importer.stack.clone(),
                        resource: importer.resource.clone(),
                        reference: format!("import:{export_name}"),
                    });
                }
            };
            if owner != importer.stack {
                let _ = snapshot
                    .importers
                    .entry(export_name.to_string())
                    .or_default()
                    .insert(importer.stack.clone());
            }
            Ok(value)
        })
    }

    /// Reads an export without recording a consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn lookup(&self, export_name: &str) -> Result<Option<String>> {
        self.read(|snapshot| snapshot.exported(export_name).map(|e| e.value.clone()))
    }

    /// Removes an export. The entry stays as a stack-local output.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::ExportInUse`] while live stacks import it, or
    /// [`StackwireError::NotFound`] if the export does not exist.
    pub fn revoke(&self, export_name: &str) -> Result<()> {
        self.mutate(|snapshot| {
            if !snapshot.exports.contains_key(export_name) {
                return Err(StackwireError::NotFound {
                    kind: "export",
                    id: export_name.to_string(),
                });
            }
            drop_export(snapshot, export_name)
        })?;
        tracing::info!(export = export_name, "export revoked");
        Ok(())
    }

    /// Drops every import claim held by `stack`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn release_imports(&self, stack: &str) -> Result<()> {
        self.mutate(|snapshot| {
            release(snapshot, stack);
            Ok(())
        })
    }

    /// Keeps only the import claims of `stack` on exports named in `imports`.
    ///
    /// Called after a stack is applied, so an export the stack no longer
    /// references stops counting it as a consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn retain_imports(&self, stack: &str, imports: &BTreeSet<&str>) -> Result<()> {
        let dropped = self.mutate(|snapshot| {
            let mut dropped = Vec::new();
            for (export_name, importers) in &mut snapshot.importers {
                if !imports.contains(export_name.as_str()) && importers.remove(stack) {
                    dropped.push(export_name.clone());
                }
            }
            snapshot.importers.retain(|_, importers| !importers.is_empty());
            Ok(dropped)
        })?;
        for export_name in &dropped {
            tracing::info!(stack, export = %export_name, "stale import claim released");
        }
        Ok(())
    }

    /// Revokes every export of `stack`, drops its entries and its import claims.
    ///
    /// Nothing changes if any of the exports is still in use.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::ExportInUse`] for the first export still imported.
    pub fn remove_stack(&self, stack: &str) -> Result<()> {
        self.mutate(|snapshot| {
            let owned: Vec<String> = snapshot
                .exports
                .iter()
                .filter(|(_, owner)| owner.stack == stack)
                .map(|(name, _)| name.clone())
                .collect();
            for export_name in &owned {
                drop_export(snapshot, export_name)?;
            }
            let _ = snapshot.stacks.remove(stack);
            release(snapshot, stack);
            Ok(())
        })?;
        tracing::info!(stack, "stack removed from registry");
        Ok(())
    }

    /// Returns every entry of `stack`, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn entries(&self, stack: &str) -> Result<Vec<ParameterEntry>> {
        self.read(|snapshot| {
            snapshot
                .stacks
                .get(stack)
                .map(|entries| entries.values().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Returns the export names owned by `stack`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn exports_of(&self, stack: &str) -> Result<Vec<String>> {
        self.read(|snapshot| {
            snapshot
                .exports
                .iter()
                .filter(|(_, owner)| owner.stack == stack)
                .map(|(name, _)| name.clone())
                .collect()
        })
    }

    /// Returns the stacks importing `export_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn importers_of(&self, export_name: &str) -> Result<Vec<String>> {
        self.read(|snapshot| snapshot.importers_of(export_name))
    }

    /// Returns the stack owning `export_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn owner_of(&self, export_name: &str) -> Result<Option<String>> {
        self.read(|snapshot| snapshot.exports.get(export_name).map(|o| o.stack.clone()))
    }

    fn read<T>(&self, f: impl FnOnce(&RegistrySnapshot) -> T) -> Result<T> {
        let guard = self.state.read().map_err(|_| poisoned())?;
        Ok(f(&guard))
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut RegistrySnapshot) -> Result<T>) -> Result<T> {
        let mut guard = self.state.write().map_err(|_| poisoned())?;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if next != *guard {
            self.store.save(&next)?;
            *guard = next;
        }
        Ok(out)
    }
}

fn apply_export(snapshot: &mut RegistrySnapshot, stack: &str, parameter: &NewParameter) -> Result<u64> {
    let claimed = parameter
        .export_name
        .as_ref()
        .and_then(|name| snapshot.exports.get(name).map(|owner| (name, owner.clone())));
    if let Some((export_name, owner)) = &claimed {
        if owner.stack != stack {
            return Err(StackwireError::DuplicateExport {
                export_name: (*export_name).clone(),
                owner: owner.stack.clone(),
                requested_by: stack.to_string(),
            });
        }
    }

    let previous_export = snapshot
        .stacks
        .get(stack)
        .and_then(|entries| entries.get(&parameter.name))
        .and_then(|entry| entry.export_name.clone());
    if let Some(previous) = previous_export {
        if parameter.export_name.as_ref() != Some(&previous) {
            drop_export(snapshot, &previous)?;
        }
    }

    let entries = snapshot.stacks.entry(stack.to_string()).or_default();
    if let Some((_, owner)) = &claimed {
        if owner.entry != parameter.name {
            if let Some(old) = entries.get_mut(&owner.entry) {
                old.export_name = None;
            }
        }
    }

    let now = Utc::now();
    let entry = match entries.get(&parameter.name) {
        Some(existing) if existing.value == parameter.value => ParameterEntry {
            export_name: parameter.export_name.clone(),
            description: parameter.description.clone(),
            ..existing.clone()
        },
        existing => ParameterEntry {
            name: parameter.name.clone(),
            value: parameter.value.clone(),
            export_name: parameter.export_name.clone(),
            description: parameter.description.clone(),
            version: existing.map_or(1, |e| e.version + 1),
            updated_at: now,
        },
    };
    let version = entry.version;
    let _ = entries.insert(parameter.name.clone(), entry);

    if let Some(export_name) = &parameter.export_name {
        let _ = snapshot.exports.insert(
            export_name.clone(),
            ExportOwner {
                stack: stack.to_string(),
                entry: parameter.name.clone(),
            },
        );
    }
    Ok(version)
}

/// Removes an export and clears it from its entry, refusing while imported.
fn drop_export(snapshot: &mut RegistrySnapshot, export_name: &str) -> Result<()> {
    let importers = snapshot.importers_of(export_name);
    if !importers.is_empty() {
        return Err(StackwireError::ExportInUse {
            export_name: export_name.to_string(),
            importers,
        });
    }
    if let Some(owner) = snapshot.exports.remove(export_name) {
        if let Some(entry) = snapshot
            .stacks
            .get_mut(&owner.stack)
            .and_then(|entries| entries.get_mut(&owner.entry))
        {
            entry.export_name = None;
        }
    }
    let _ = snapshot.importers.remove(export_name);
    Ok(())
}

fn release(snapshot: &mut RegistrySnapshot, stack: &str) {
    for set in snapshot.importers.values_mut() {
        let _ = set.remove(stack);
    }
    snapshot.importers.retain(|_, set| !set.is_empty());
}

fn poisoned() -> StackwireError {
    StackwireError::Config {
        message: "parameter registry lock poisoned".into(),
    }
}
