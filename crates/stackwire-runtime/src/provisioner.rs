//! Per-stack provisioning.
//!
//! Apply walks a [`ResourceGraph`] in topological order, resolving each
//! node against the attributes already recorded for its dependencies,
//! then creates, updates, or leaves it alone. Destroy walks the reverse
//! order. Both persist the deployment state after every change, so a run
//! interrupted at any point can be resumed.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use stackwire_common::error::{Result, StackwireError};
use stackwire_common::types::{NodeState, RemovalPolicy, ResourceAddress, ResourceKind};
use stackwire_compose::builder::ResourceGraph;
use stackwire_compose::model::{Reference, ResourceDeclaration};
use stackwire_compose::resolver::{ResolutionContext, Resolver};
use stackwire_registry::{NewParameter, ParameterRegistry};

use crate::cancel::CancelHandle;
use crate::lifecycle::NodeTracker;
use crate::provider::{ProviderError, ProviderSet, ResourceProvider, ResourceRequest};
use crate::state::{DeploymentState, ResourceRecord, ResumePoint, StateStore};

/// What happens, or happened, to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// The resource does not exist yet.
    Create,
    /// Resolved properties differ from the recorded ones.
    Update,
    /// Resolved properties match the record.
    NoOp,
    /// The resource is deleted.
    Delete,
    /// The resource is kept and forgotten.
    Retain,
}

/// Outcome of one node in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    /// Owning stack.
    pub stack: String,
    /// Logical id.
    pub resource: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// State reached.
    pub state: NodeState,
    /// Action attempted, if the node was reached.
    pub action: Option<Action>,
    /// Error message for failed or blocked nodes.
    pub error: Option<String>,
}

impl NodeReport {
    /// A node the run never reached.
    #[must_use]
    pub fn pending(stack: &str, declaration: &ResourceDeclaration) -> Self {
        Self {
            stack: stack.to_string(),
            resource: declaration.id.clone(),
            kind: declaration.kind,
            state: NodeState::Pending,
            action: None,
            error: None,
        }
    }

    /// Address of the node.
    #[must_use]
    pub fn address(&self) -> ResourceAddress {
        ResourceAddress::new(self.stack.clone(), self.resource.clone())
    }
}

/// Resolves against recorded attributes and claims imports in the registry.
pub(crate) struct LiveContext<'a> {
    pub(crate) stack: &'a str,
    pub(crate) state: &'a DeploymentState,
    pub(crate) registry: &'a ParameterRegistry,
}

impl ResolutionContext for LiveContext<'_> {
    fn attribute(&self, resource: &str, attribute: &str) -> Option<serde_json::Value> {
        self.state
            .record(self.stack, resource)?
            .attributes
            .get(attribute)
            .cloned()
    }

    fn import(&self, importer: &ResourceAddress, export_name: &str) -> Result<String> {
        self.registry.import(importer, export_name)
    }
}

/// Executes provider operations for one stack at a time.
pub struct Provisioner<'a> {
    providers: &'a ProviderSet,
    registry: &'a ParameterRegistry,
    store: &'a dyn StateStore,
    cancel: &'a CancelHandle,
    timeout: Duration,
}

/// Mutable bookkeeping shared by every stack of a run.
pub struct RunLog<'s> {
    /// Deployment state, saved after every change.
    pub state: &'s mut DeploymentState,
    /// Node states.
    pub tracker: &'s mut NodeTracker,
    /// Reports in execution order.
    pub reports: &'s mut Vec<NodeReport>,
}

impl<'a> Provisioner<'a> {
    /// Creates a provisioner.
    #[must_use]
    pub const fn new(
        providers: &'a ProviderSet,
        registry: &'a ParameterRegistry,
        store: &'a dyn StateStore,
        cancel: &'a CancelHandle,
        timeout: Duration,
    ) -> Self {
        Self {
            providers,
            registry,
            store,
            cancel,
            timeout,
        }
    }

    /// Applies one stack.
    ///
    /// On success every declared resource is `Created`, outputs are
    /// exported, stale resources are deleted, and stale exports revoked.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the stack: [`StackwireError::Cancelled`]
    /// when cancellation was requested, [`StackwireError::ResourceOperation`]
    /// for a provider failure or timeout, or a resolution, registry, or state
    /// error. Nodes after the failing one are reported `Pending`.
    pub async fn apply_stack(&self, graph: &ResourceGraph, run: &mut RunLog<'_>) -> Result<()> {
        let stack = graph.stack();
        tracing::info!(stack = %stack, resources = graph.len(), "applying stack");

        let ordered: Vec<&ResourceDeclaration> = graph.ordered().collect();
        for (position, declaration) in ordered.iter().enumerate() {
            let address = ResourceAddress::new(stack, declaration.id.clone());
            if self.cancel.is_cancelled() {
                run.state.resume_point = Some(ResumePoint {
                    stack: stack.to_string(),
                    resource: declaration.id.clone(),
                });
                self.store.save(run.state)?;
                push_pending(run.reports, stack, &ordered[position..]);
                tracing::info!(resource = %address, "apply cancelled");
                return Err(StackwireError::Cancelled {
                    stack: stack.to_string(),
                    resource: declaration.id.clone(),
                });
            }
            if let Err(e) = self.apply_node(graph, declaration, &address, run).await {
                push_pending(run.reports, stack, &ordered[position + 1..]);
                return Err(e);
            }
        }

        self.export_outputs(graph, run.state)?;
        self.remove_stale_resources(graph, run).await?;
        self.registry.retain_imports(stack, &graph.unit().import_names())?;
        self.revoke_stale_exports(graph)?;
        tracing::info!(stack = %stack, "stack applied");
        Ok(())
    }

    async fn apply_node(
        &self,
        graph: &ResourceGraph,
        declaration: &ResourceDeclaration,
        address: &ResourceAddress,
        run: &mut RunLog<'_>,
    ) -> Result<()> {
        let stack = graph.stack();
        let existing = run.state.record(stack, &declaration.id).cloned();
        let initial = if existing.is_some() {
            NodeState::Created
        } else {
            NodeState::Pending
        };
        run.tracker.register(address.clone(), initial);
        run.tracker.transition(address, NodeState::Resolving)?;

        let context = LiveContext {
            stack,
            state: &*run.state,
            registry: self.registry,
        };
        let resolved = Resolver::new(graph.unit(), &context).resolve_properties(declaration);
        let properties = match resolved {
            Ok(properties) => properties,
            Err(e) => return fail_node(address, declaration.kind, None, e, run),
        };

        let request = ResourceRequest {
            stack: stack.to_string(),
            logical_id: declaration.id.clone(),
            kind: declaration.kind,
            properties,
        };
        let now = Utc::now();
        let depends_on: Vec<String> = graph
            .dependencies_of(&declaration.id)
            .into_iter()
            .map(ToString::to_string)
            .collect();

        let (action, record) = match existing {
            None => {
                run.tracker.transition(address, NodeState::Creating)?;
                let created = self
                    .invoke(address, declaration.kind, |provider| async move {
                        provider.create(&request).await.map(|out| (out, request))
                    })
                    .await;
                let ((physical_id, attributes), request) = match created {
                    Ok(out) => out,
                    Err(e) => return fail_node(address, declaration.kind, Some(Action::Create), e, run),
                };
                let sequence = run
                    .state
                    .stack(stack)
                    .map_or(1, crate::state::StackRecord::next_sequence);
                let record = ResourceRecord {
                    physical_id,
                    kind: declaration.kind,
                    properties: request.properties,
                    attributes,
                    removal_policy: declaration.removal_policy(),
                    depends_on,
                    sequence,
                    created_at: now,
                    updated_at: now,
                };
                (Action::Create, record)
            }
            Some(record) if record.properties == request.properties && record.kind == declaration.kind => {
                let record = ResourceRecord {
                    removal_policy: declaration.removal_policy(),
                    depends_on,
                    ..record
                };
                (Action::NoOp, record)
            }
            Some(record) => {
                run.tracker.transition(address, NodeState::Updating)?;
                let physical_id = record.physical_id.clone();
                let updated = self
                    .invoke(address, declaration.kind, |provider| async move {
                        provider
                            .update(&physical_id, &request)
                            .await
                            .map(|attributes| (attributes, request))
                    })
                    .await;
                let (attributes, request) = match updated {
                    Ok(out) => out,
                    Err(e) => return fail_node(address, declaration.kind, Some(Action::Update), e, run),
                };
                let record = ResourceRecord {
                    kind: declaration.kind,
                    properties: request.properties,
                    attributes,
                    removal_policy: declaration.removal_policy(),
                    depends_on,
                    updated_at: now,
                    ..record
                };
                (Action::Update, record)
            }
        };

        let changed = run.state.record(stack, &declaration.id) != Some(&record);
        run.state.upsert(stack, &declaration.id, record);
        if changed {
            self.store.save(run.state)?;
        }
        run.tracker.transition(address, NodeState::Created)?;
        tracing::info!(resource = %address, kind = %declaration.kind, action = ?action, "resource ready");
        run.reports.push(NodeReport {
            stack: stack.to_string(),
            resource: declaration.id.clone(),
            kind: declaration.kind,
            state: NodeState::Created,
            action: Some(action),
            error: None,
        });
        Ok(())
    }

    fn export_outputs(&self, graph: &ResourceGraph, state: &DeploymentState) -> Result<()> {
        let stack = graph.stack();
        let context = LiveContext {
            stack,
            state,
            registry: self.registry,
        };
        let resolver = Resolver::new(graph.unit(), &context);
        for output in &graph.unit().outputs {
            let value = resolver.resolve_output(output)?;
            let mut parameter = NewParameter::new(output.name.clone(), value);
            parameter.export_name.clone_from(&output.export_name);
            parameter.description.clone_from(&output.description);
            let _ = self.registry.export(stack, parameter)?;
        }
        Ok(())
    }

    async fn remove_stale_resources(&self, graph: &ResourceGraph, run: &mut RunLog<'_>) -> Result<()> {
        let stack = graph.stack();
        let stale: Vec<(String, ResourceRecord)> = run
            .state
            .stack(stack)
            .map(|records| {
                records
                    .creation_order()
                    .into_iter()
                    .rev()
                    .filter(|(id, _)| graph.declaration(id).is_none())
                    .map(|(id, record)| (id.to_string(), record.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (id, record) in stale {
            tracing::info!(stack = %stack, resource = %id, "removing stale resource");
            let address = ResourceAddress::new(stack, id);
            run.tracker.register(address.clone(), NodeState::Created);
            self.teardown_node(&address, &record, record.removal_policy, run)
                .await?;
        }
        Ok(())
    }

    fn revoke_stale_exports(&self, graph: &ResourceGraph) -> Result<()> {
        let declared: BTreeSet<&str> = graph.unit().export_names().into_iter().collect();
        for export_name in self.registry.exports_of(graph.stack())? {
            if !declared.contains(export_name.as_str()) {
                tracing::info!(stack = %graph.stack(), export = %export_name, "revoking stale export");
                self.registry.revoke(&export_name)?;
            }
        }
        Ok(())
    }

    /// Destroys one stack in reverse topological order.
    ///
    /// Resources backing an export still imported by another stack are
    /// blocked together with everything they depend on; they stay `Created`
    /// and are reported with the error. Returns `true` when the stack was
    /// fully torn down, in which case its exports, entries, and import claims
    /// are removed from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::ResourceOperation`] when a provider delete
    /// fails or times out, aborting the remaining nodes.
    pub async fn destroy_stack(&self, graph: &ResourceGraph, run: &mut RunLog<'_>) -> Result<bool> {
        let stack = graph.stack();
        tracing::info!(stack = %stack, "destroying stack");
        let blocked = self.blocked_resources(graph)?;

        let mut order: Vec<String> = run
            .state
            .stack(stack)
            .map(|records| {
                records
                    .creation_order()
                    .into_iter()
                    .rev()
                    .filter(|(id, _)| graph.declaration(id).is_none())
                    .map(|(id, _)| id.to_string())
                    .collect()
            })
            .unwrap_or_default();
        order.extend(graph.reverse_ordered().map(|d| d.id.clone()));

        let mut complete = true;
        for id in order {
            let Some(record) = run.state.record(stack, &id).cloned() else {
                continue;
            };
            let address = ResourceAddress::new(stack, id.clone());
            run.tracker.register(address.clone(), NodeState::Created);

            if let Some(error) = blocked.get(&id) {
                tracing::warn!(resource = %address, error = %error, "destroy blocked");
                run.reports.push(NodeReport {
                    stack: stack.to_string(),
                    resource: id,
                    kind: record.kind,
                    state: NodeState::Created,
                    action: None,
                    error: Some(error.to_string()),
                });
                complete = false;
                continue;
            }

            let policy = graph
                .declaration(&id)
                .map_or(record.removal_policy, ResourceDeclaration::removal_policy);
            self.teardown_node(&address, &record, policy, run).await?;
        }

        if complete {
            self.registry.remove_stack(stack)?;
            tracing::info!(stack = %stack, "stack destroyed");
        }
        Ok(complete)
    }

    /// Maps each blocked resource to the export-in-use error blocking it.
    fn blocked_resources(&self, graph: &ResourceGraph) -> Result<BTreeMap<String, StackwireError>> {
        let stack = graph.stack();
        let mut blocked = BTreeMap::new();
        for export_name in self.registry.exports_of(stack)? {
            let importers: Vec<String> = self
                .registry
                .importers_of(&export_name)?
                .into_iter()
                .filter(|importer| importer != stack)
                .collect();
            if importers.is_empty() {
                continue;
            }

            let entry = self
                .registry
                .entries(stack)?
                .into_iter()
                .find(|e| e.export_name.as_deref() == Some(export_name.as_str()));
            let output = entry.and_then(|entry| {
                graph.unit().outputs.iter().find(|o| o.name == entry.name)
            });
            let backing: Vec<&str> = match output {
                Some(output) => output
                    .value
                    .references()
                    .into_iter()
                    .filter_map(|r| match r {
                        Reference::Attribute { resource, .. } => Some(resource.as_str()),
                        _ => None,
                    })
                    .collect(),
                None => graph.unit().resources.iter().map(|r| r.id.as_str()).collect(),
            };

            for id in graph.transitive_dependencies(backing) {
                let _ = blocked.entry(id).or_insert_with(|| StackwireError::ExportInUse {
                    export_name: export_name.clone(),
                    importers: importers.clone(),
                });
            }
        }
        Ok(blocked)
    }

    async fn teardown_node(
        &self,
        address: &ResourceAddress,
        record: &ResourceRecord,
        policy: RemovalPolicy,
        run: &mut RunLog<'_>,
    ) -> Result<()> {
        if policy == RemovalPolicy::Retain {
            run.tracker.transition(address, NodeState::Retained)?;
            let _ = run.state.forget(&address.stack, &address.resource);
            self.store.save(run.state)?;
            tracing::info!(resource = %address, physical_id = %record.physical_id, "resource retained");
            run.reports.push(NodeReport {
                stack: address.stack.clone(),
                resource: address.resource.clone(),
                kind: record.kind,
                state: NodeState::Retained,
                action: Some(Action::Retain),
                error: None,
            });
            return Ok(());
        }

        run.tracker.transition(address, NodeState::Destroying)?;
        let physical_id = record.physical_id.clone();
        let kind = record.kind;
        let deleted = self
            .invoke(address, kind, |provider| async move {
                provider.delete(&physical_id, kind).await
            })
            .await;
        if let Err(e) = deleted {
            return fail_node(address, kind, Some(Action::Delete), e, run);
        }

        run.tracker.transition(address, NodeState::Destroyed)?;
        let _ = run.state.forget(&address.stack, &address.resource);
        self.store.save(run.state)?;
        tracing::info!(resource = %address, physical_id = %record.physical_id, "resource destroyed");
        run.reports.push(NodeReport {
            stack: address.stack.clone(),
            resource: address.resource.clone(),
            kind,
            state: NodeState::Destroyed,
            action: Some(Action::Delete),
            error: None,
        });
        Ok(())
    }

    /// Runs one provider call under the operation timeout.
    async fn invoke<'p, T, F, Fut>(&'p self, address: &ResourceAddress, kind: ResourceKind, call: F) -> Result<T>
    where
        F: FnOnce(&'p dyn ResourceProvider) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let provider = self
            .providers
            .get(kind)
            .ok_or_else(|| operation_error(address, format!("no provider registered for kind {kind}")))?;
        match tokio::time::timeout(self.timeout, call(provider.as_ref())).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(e)) => Err(operation_error(address, e.0)),
            Err(_) => Err(operation_error(
                address,
                format!("timed out after {}ms", self.timeout.as_millis()),
            )),
        }
    }
}

/// Marks a node `Failed`, reports it, and returns the error to abort with.
fn fail_node<T>(
    address: &ResourceAddress,
    kind: ResourceKind,
    action: Option<Action>,
    error: StackwireError,
    run: &mut RunLog<'_>,
) -> Result<T> {
    run.tracker.transition(address, NodeState::Failed)?;
    tracing::warn!(resource = %address, error = %error, "resource failed");
    run.reports.push(NodeReport {
        stack: address.stack.clone(),
        resource: address.resource.clone(),
        kind,
        state: NodeState::Failed,
        action,
        error: Some(error.to_string()),
    });
    Err(error)
}

fn push_pending(reports: &mut Vec<NodeReport>, stack: &str, declarations: &[&ResourceDeclaration]) {
    reports.extend(
        declarations
            .iter()
            .map(|declaration| NodeReport::pending(stack, declaration)),
    );
}

fn operation_error(address: &ResourceAddress, message: String) -> StackwireError {
    StackwireError::ResourceOperation {
        stack: address.stack.clone(),
        resource: address.resource.clone(),
        message,
    }
}
