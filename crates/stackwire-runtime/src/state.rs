//! Persistent deployment state.
//!
//! Maintains a durable record of every provisioned resource, enabling
//! create/update/no-op decisions, stale resource cleanup, and resumption
//! after a cancelled or failed run. The provisioner saves the whole document
//! after every node transition that changes it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackwire_common::constants::STATE_VERSION;
use stackwire_common::error::{Result, StackwireError};
use stackwire_common::persist;
use stackwire_common::types::{RemovalPolicy, ResourceKind};
use uuid::Uuid;

use crate::provider::Attributes;

/// Persistent record of one provisioned resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Identifier assigned by the provider.
    pub physical_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Properties as last sent to the provider.
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Attributes reported by the provider.
    pub attributes: Attributes,
    /// Policy applied when the resource is torn down.
    pub removal_policy: RemovalPolicy,
    /// Local dependencies at the time of the last apply.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Creation sequence within the stack, starting at 1.
    pub sequence: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful create or update.
    pub updated_at: DateTime<Utc>,
}

/// Records of one stack, keyed by logical id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackRecord {
    /// Provisioned resources.
    pub resources: BTreeMap<String, ResourceRecord>,
}

impl StackRecord {
    /// Sequence number for the next created resource.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.resources
            .values()
            .map(|r| r.sequence)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Records in creation order.
    #[must_use]
    pub fn creation_order(&self) -> Vec<(&str, &ResourceRecord)> {
        let mut records: Vec<_> = self
            .resources
            .iter()
            .map(|(id, record)| (id.as_str(), record))
            .collect();
        records.sort_by_key(|(id, record)| (record.sequence, *id));
        records
    }
}

/// Where a cancelled apply stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Stack of the first node not attempted.
    pub stack: String,
    /// First node not attempted.
    pub resource: String,
}

/// Kind of run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Plan and apply.
    Apply,
    /// Teardown.
    Destroy,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every node reached its target state.
    Succeeded,
    /// Some node failed or was blocked.
    Failed,
    /// The run was cancelled.
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of the last finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier.
    pub id: Uuid,
    /// Kind of run.
    pub kind: RunKind,
    /// Outcome.
    pub outcome: RunOutcome,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: DateTime<Utc>,
}

/// The whole deployment state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Document version.
    pub version: u32,
    /// Last time the document changed.
    pub updated_at: DateTime<Utc>,
    /// Records keyed by stack name.
    pub stacks: BTreeMap<String, StackRecord>,
    /// Set by a cancelled apply, cleared by the next completed one.
    #[serde(default)]
    pub resume_point: Option<ResumePoint>,
    /// Summary of the last finished run.
    #[serde(default)]
    pub last_run: Option<RunSummary>,
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            stacks: BTreeMap::new(),
            resume_point: None,
            last_run: None,
        }
    }
}

impl DeploymentState {
    /// Returns the records of a stack.
    #[must_use]
    pub fn stack(&self, name: &str) -> Option<&StackRecord> {
        self.stacks.get(name)
    }

    /// Returns one resource record.
    #[must_use]
    pub fn record(&self, stack: &str, resource: &str) -> Option<&ResourceRecord> {
        self.stacks.get(stack)?.resources.get(resource)
    }

    /// Inserts or replaces a record.
    pub fn upsert(&mut self, stack: &str, resource: &str, record: ResourceRecord) {
        let _ = self
            .stacks
            .entry(stack.to_string())
            .or_default()
            .resources
            .insert(resource.to_string(), record);
        self.updated_at = Utc::now();
    }

    /// Removes a record, dropping the stack once it is empty.
    pub fn forget(&mut self, stack: &str, resource: &str) -> Option<ResourceRecord> {
        let records = self.stacks.get_mut(stack)?;
        let removed = records.resources.remove(resource);
        if records.resources.is_empty() {
            let _ = self.stacks.remove(stack);
        }
        self.updated_at = Utc::now();
        removed
    }
}

/// Durable backing store for the deployment state.
pub trait StateStore: Send + Sync + fmt::Debug {
    /// Loads the last saved state, or an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be read.
    fn load(&self) -> Result<DeploymentState>;

    /// Replaces the saved state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn save(&self, state: &DeploymentState) -> Result<()>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<DeploymentState>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<DeploymentState> {
        let guard = self.state.lock().map_err(|_| poisoned())?;
        Ok(guard.clone().unwrap_or_default())
    }

    fn save(&self, state: &DeploymentState) -> Result<()> {
        let mut guard = self.state.lock().map_err(|_| poisoned())?;
        *guard = Some(state.clone());
        Ok(())
    }
}

/// JSON document store.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
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

impl StateStore for JsonFileStateStore {
    fn load(&self) -> Result<DeploymentState> {
        tracing::debug!(path = %self.path.display(), "loading deployment state");
        let state: DeploymentState = persist::read_json(&self.path)?.unwrap_or_default();
        if state.version != STATE_VERSION {
            return Err(StackwireError::Config {
                message: format!(
                    "unsupported state version {} in {}",
                    state.version,
                    self.path.display()
                ),
            });
        }
        Ok(state)
    }

    fn save(&self, state: &DeploymentState) -> Result<()> {
        tracing::debug!(path = %self.path.display(), "saving deployment state");
        persist::write_json_atomic(&self.path, state)
    }
}

fn poisoned() -> StackwireError {
    StackwireError::Config {
        message: "state store lock poisoned".into(),
    }
}
