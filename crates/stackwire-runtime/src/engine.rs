//! Engine that plans, applies, and destroys batches of stacks.
//!
//! Planning runs every check that can fail without touching a provider:
//! validation, cross-stack ordering, graph construction, and a preview of
//! each node's action against the recorded state. Apply and destroy then
//! drive the [`Provisioner`] stack by stack and report per node.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use stackwire_common::config::StackwireConfig;
use stackwire_common::error::{Result, StackwireError};
use stackwire_common::types::{NodeState, RemovalPolicy, ResourceAddress, ResourceKind};
use stackwire_compose::builder::{ResourceGraph, ResourceGraphBuilder};
use stackwire_compose::composer::StackComposer;
use stackwire_compose::model::StackUnit;
use stackwire_compose::resolver::{ResolutionContext, Resolver};
use stackwire_registry::{JsonFileParameterStore, ParameterRegistry};
use uuid::Uuid;

pub use crate::provisioner::{Action, NodeReport};

use crate::cancel::CancelHandle;
use crate::digest::sha256_hex;
use crate::lifecycle::NodeTracker;
use crate::provider::ProviderSet;
use crate::provisioner::{Provisioner, RunLog};
use crate::state::{
    DeploymentState, JsonFileStateStore, MemoryStateStore, RunKind, RunOutcome, RunSummary, StateStore,
};

/// Process exit status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every node reached its target state.
    Success,
    /// Some node failed or was blocked, or the run was cancelled.
    PartialFailure,
    /// Planning failed and nothing was attempted.
    HardFailure,
}

impl ExitStatus {
    /// Numeric process exit code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::PartialFailure => 1,
            Self::HardFailure => 2,
        }
    }
}

/// One previewed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOperation {
    /// Owning stack.
    pub stack: String,
    /// Logical id.
    pub resource: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Previewed action.
    pub action: Action,
    /// Properties as they would be sent, when every reference is already
    /// known at planning time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, serde_json::Value>>,
}

/// Validated, ordered batch of stacks with the previewed operations.
#[derive(Debug, Clone)]
pub struct Plan {
    stacks: Vec<StackUnit>,
    operations: Vec<PlannedOperation>,
    digest: String,
}

impl Plan {
    /// Prepared stacks in apply order.
    #[must_use]
    pub fn stacks(&self) -> &[StackUnit] {
        &self.stacks
    }

    /// Stack names in apply order.
    #[must_use]
    pub fn stack_order(&self) -> Vec<&str> {
        self.stacks.iter().map(|s| s.name.as_str()).collect()
    }

    /// Operations in execution order.
    #[must_use]
    pub fn operations(&self) -> &[PlannedOperation] {
        &self.operations
    }

    /// Operations that change something.
    pub fn changes(&self) -> impl Iterator<Item = &PlannedOperation> {
        self.operations.iter().filter(|op| op.action != Action::NoOp)
    }

    /// Hex SHA-256 over the serialized operations.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Outcome of [`Engine::apply`].
#[derive(Debug)]
pub struct ApplyResult {
    /// Run identifier.
    pub run_id: Uuid,
    /// Per-node outcomes in execution order.
    pub reports: Vec<NodeReport>,
    /// Error that stopped the run, if any.
    pub abort: Option<StackwireError>,
    /// Exit status.
    pub status: ExitStatus,
}

impl ApplyResult {
    /// The report of one node.
    #[must_use]
    pub fn report(&self, stack: &str, resource: &str) -> Option<&NodeReport> {
        self.reports
            .iter()
            .find(|r| r.stack == stack && r.resource == resource)
    }

    /// Reports of nodes that ended in `state`.
    #[must_use]
    pub fn in_state(&self, state: NodeState) -> Vec<&NodeReport> {
        self.reports.iter().filter(|r| r.state == state).collect()
    }

    /// Where a cancelled run stopped.
    #[must_use]
    pub fn cancelled_at(&self) -> Option<ResourceAddress> {
        match &self.abort {
            Some(StackwireError::Cancelled { stack, resource }) => {
                Some(ResourceAddress::new(stack.clone(), resource.clone()))
            }
            _ => None,
        }
    }
}

/// Outcome of [`Engine::destroy`].
#[derive(Debug)]
pub struct DestroyResult {
    /// Run identifier.
    pub run_id: Uuid,
    /// Per-node outcomes in teardown order. Blocked nodes stay `Created`
    /// and carry the export-in-use error.
    pub reports: Vec<NodeReport>,
    /// Error that stopped the run, if any.
    pub abort: Option<StackwireError>,
    /// Stacks fully torn down.
    pub destroyed_stacks: Vec<String>,
    /// Exit status.
    pub status: ExitStatus,
}

impl DestroyResult {
    /// The report of one node.
    #[must_use]
    pub fn report(&self, stack: &str, resource: &str) -> Option<&NodeReport> {
        self.reports
            .iter()
            .find(|r| r.stack == stack && r.resource == resource)
    }

    /// Reports of nodes the run could not tear down because of an export
    /// still in use.
    #[must_use]
    pub fn blocked(&self) -> Vec<&NodeReport> {
        self.reports
            .iter()
            .filter(|r| r.state == NodeState::Created && r.error.is_some())
            .collect()
    }
}

/// Plans and executes stack batches against a set of providers.
#[derive(Debug)]
pub struct Engine {
    composer: StackComposer,
    providers: ProviderSet,
    registry: Arc<ParameterRegistry>,
    state_store: Arc<dyn StateStore>,
    cancel: CancelHandle,
    timeout: Duration,
}

impl Engine {
    /// Creates an engine over explicit stores.
    #[must_use]
    pub fn new(
        config: &StackwireConfig,
        providers: ProviderSet,
        registry: Arc<ParameterRegistry>,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            composer: StackComposer::from_config(config),
            providers,
            registry,
            state_store,
            cancel: CancelHandle::new(),
            timeout: config.operation_timeout(),
        }
    }

    /// Creates an engine with in-memory state and registry.
    #[must_use]
    pub fn in_memory(config: &StackwireConfig, providers: ProviderSet) -> Self {
        Self::new(
            config,
            providers,
            Arc::new(ParameterRegistry::in_memory()),
            Arc::new(MemoryStateStore::new()),
        )
    }

    /// Creates an engine persisting state and registry as JSON documents in
    /// the configured state directory.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing registry document cannot be read.
    pub fn open(config: &StackwireConfig, providers: ProviderSet) -> Result<Self> {
        tracing::info!(state_dir = %config.state_dir.display(), "opening engine");
        let registry = ParameterRegistry::open(Arc::new(JsonFileParameterStore::new(config.registry_file())))?;
        Ok(Self::new(
            config,
            providers,
            Arc::new(registry),
            Arc::new(JsonFileStateStore::new(config.state_file())),
        ))
    }

    /// Overrides the provider operation timeout.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the cancellation handle, so a caller can share one across
    /// engines or hand it to a signal handler before the first run.
    #[must_use]
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// The parameter registry.
    #[must_use]
    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Loads the current deployment state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot be read.
    pub fn state(&self) -> Result<DeploymentState> {
        self.state_store.load()
    }

    /// A handle that cancels this engine's apply runs.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Validates and orders `stacks`, builds every graph, and previews the
    /// operations an apply would perform.
    ///
    /// # Errors
    ///
    /// Returns any validation, ordering, duplicate export, unresolved
    /// reference, or cycle error. No provider is called.
    pub fn plan(&self, stacks: Vec<StackUnit>) -> Result<Plan> {
        let prepared = self.composer.prepare(stacks)?;
        let order = self.composer.order(&prepared, &self.registry)?;
        let mut slots: Vec<Option<StackUnit>> = prepared.into_iter().map(Some).collect();
        let stacks: Vec<StackUnit> = order.iter().filter_map(|&i| slots[i].take()).collect();

        let graphs = self.build_graphs(&stacks)?;
        let state = self.state_store.load()?;
        let mut operations = Vec::new();
        for graph in &graphs {
            preview_stack(graph, &state, &self.registry, &mut operations);
        }

        let digest = sha256_hex([serde_json::to_string(&operations)?]);
        tracing::info!(
            stacks = stacks.len(),
            operations = operations.len(),
            digest = %digest,
            "plan ready"
        );
        Ok(Plan {
            stacks,
            operations,
            digest,
        })
    }

    /// Applies a plan.
    ///
    /// Graphs are rebuilt against the current registry first; a failure
    /// there is a [`ExitStatus::HardFailure`] with nothing attempted. After
    /// that, the first failing, timed out, or cancelled node aborts the run.
    pub async fn apply(&self, plan: &Plan) -> ApplyResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(run = %run_id, digest = %plan.digest(), "apply started");

        let prepared = self.build_graphs(plan.stacks()).and_then(|graphs| {
            self.state_store.load().map(|state| (graphs, state))
        });
        let (graphs, mut state) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(run = %run_id, error = %e, "apply rejected");
                return ApplyResult {
                    run_id,
                    reports: Vec::new(),
                    abort: Some(e),
                    status: ExitStatus::HardFailure,
                };
            }
        };

        let provisioner = self.provisioner();
        let mut tracker = NodeTracker::new();
        let mut reports = Vec::new();
        let mut abort = None;
        for (position, graph) in graphs.iter().enumerate() {
            let mut run = RunLog {
                state: &mut state,
                tracker: &mut tracker,
                reports: &mut reports,
            };
            if let Err(e) = provisioner.apply_stack(graph, &mut run).await {
                for later in &graphs[position + 1..] {
                    reports.extend(later.ordered().map(|d| NodeReport::pending(later.stack(), d)));
                }
                abort = Some(e);
                break;
            }
        }

        let outcome = match &abort {
            None => {
                state.resume_point = None;
                RunOutcome::Succeeded
            }
            Some(StackwireError::Cancelled { .. }) => RunOutcome::Cancelled,
            Some(_) => RunOutcome::Failed,
        };
        if let Err(e) = self.finish(&mut state, run_id, RunKind::Apply, outcome, started_at) {
            let _ = abort.get_or_insert(e);
        }

        let status = if abort.is_some() {
            ExitStatus::PartialFailure
        } else {
            ExitStatus::Success
        };
        tracing::info!(run = %run_id, outcome = %outcome, nodes = reports.len(), "apply finished");
        ApplyResult {
            run_id,
            reports,
            abort,
            status,
        }
    }

    /// Tears down `stacks` in reverse dependency order.
    ///
    /// Resources backing an export that a stack outside the batch still
    /// imports are left in place and reported; everything else is deleted
    /// or, for `Retain` resources, forgotten.
    pub async fn destroy(&self, stacks: Vec<StackUnit>) -> DestroyResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(run = %run_id, stacks = stacks.len(), "destroy started");

        let prepared = self.prepare_teardown(stacks).and_then(|graphs| {
            self.state_store.load().map(|state| (graphs, state))
        });
        let (graphs, mut state) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(run = %run_id, error = %e, "destroy rejected");
                return DestroyResult {
                    run_id,
                    reports: Vec::new(),
                    abort: Some(e),
                    destroyed_stacks: Vec::new(),
                    status: ExitStatus::HardFailure,
                };
            }
        };

        let provisioner = self.provisioner();
        let mut tracker = NodeTracker::new();
        let mut reports = Vec::new();
        let mut destroyed_stacks = Vec::new();
        let mut abort = None;
        for graph in &graphs {
            let mut run = RunLog {
                state: &mut state,
                tracker: &mut tracker,
                reports: &mut reports,
            };
            match provisioner.destroy_stack(graph, &mut run).await {
                Ok(true) => destroyed_stacks.push(graph.stack().to_string()),
                Ok(false) => {}
                Err(e) => {
                    abort = Some(e);
                    break;
                }
            }
        }

        let clean = abort.is_none() && destroyed_stacks.len() == graphs.len();
        let outcome = if clean {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        };
        if let Err(e) = self.finish(&mut state, run_id, RunKind::Destroy, outcome, started_at) {
            let _ = abort.get_or_insert(e);
        }

        let status = if clean && abort.is_none() {
            ExitStatus::Success
        } else {
            ExitStatus::PartialFailure
        };
        tracing::info!(run = %run_id, outcome = %outcome, destroyed = destroyed_stacks.len(), "destroy finished");
        DestroyResult {
            run_id,
            reports,
            abort,
            destroyed_stacks,
            status,
        }
    }

    fn provisioner(&self) -> Provisioner<'_> {
        Provisioner::new(
            &self.providers,
            &self.registry,
            self.state_store.as_ref(),
            &self.cancel,
            self.timeout,
        )
    }

    fn build_graphs(&self, stacks: &[StackUnit]) -> Result<Vec<ResourceGraph>> {
        let batch = StackComposer::batch_exports(stacks)?;
        let builder = ResourceGraphBuilder::new(&self.registry, &batch);
        stacks.iter().map(|stack| builder.build(stack)).collect()
    }

    fn prepare_teardown(&self, stacks: Vec<StackUnit>) -> Result<Vec<ResourceGraph>> {
        let prepared = self.composer.prepare(stacks)?;
        let order = self.composer.teardown_order(&prepared)?;
        let builder = ResourceGraphBuilder::teardown();
        order.iter().map(|&i| builder.build(&prepared[i])).collect()
    }

    fn finish(
        &self,
        state: &mut DeploymentState,
        id: Uuid,
        kind: RunKind,
        outcome: RunOutcome,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        state.last_run = Some(RunSummary {
            id,
            kind,
            outcome,
            started_at,
            finished_at: Utc::now(),
        });
        state.updated_at = Utc::now();
        self.state_store.save(state)
    }
}

/// Reads recorded attributes and looks imports up without claiming them.
struct PreviewContext<'a> {
    stack: &'a str,
    state: &'a DeploymentState,
    registry: &'a ParameterRegistry,
}

impl ResolutionContext for PreviewContext<'_> {
    fn attribute(&self, resource: &str, attribute: &str) -> Option<serde_json::Value> {
        self.state
            .record(self.stack, resource)?
            .attributes
            .get(attribute)
            .cloned()
    }

    fn import(&self, importer: &ResourceAddress, export_name: &str) -> Result<String> {
        self.registry
            .lookup(export_name)?
            .ok_or_else(|| StackwireError::UnresolvedReference {
                stack: importer.stack.clone(),
                resource: importer.resource.clone(),
                reference: format!("import:{export_name}"),
            })
    }
}

fn preview_stack(
    graph: &ResourceGraph,
    state: &DeploymentState,
    registry: &ParameterRegistry,
    operations: &mut Vec<PlannedOperation>,
) {
    let stack = graph.stack();
    let context = PreviewContext {
        stack,
        state,
        registry,
    };
    let resolver = Resolver::new(graph.unit(), &context);

    for declaration in graph.ordered() {
        let properties = resolver.resolve_properties(declaration).ok();
        let action = match state.record(stack, &declaration.id) {
            None => Action::Create,
            Some(record)
                if record.kind == declaration.kind
                    && properties.as_ref() == Some(&record.properties) =>
            {
                Action::NoOp
            }
            Some(_) => Action::Update,
        };
        operations.push(PlannedOperation {
            stack: stack.to_string(),
            resource: declaration.id.clone(),
            kind: declaration.kind,
            action,
            properties,
        });
    }

    if let Some(records) = state.stack(stack) {
        for (id, record) in records.creation_order().into_iter().rev() {
            if graph.declaration(id).is_some() {
                continue;
            }
            let action = if record.removal_policy == RemovalPolicy::Retain {
                Action::Retain
            } else {
                Action::Delete
            };
            operations.push(PlannedOperation {
                stack: stack.to_string(),
                resource: id.to_string(),
                kind: record.kind,
                action,
                properties: None,
            });
        }
    }
}
