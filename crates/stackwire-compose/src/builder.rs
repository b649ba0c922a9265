//! Resource graph construction for a single stack.
//!
//! The builder scans every declaration for references, turns local
//! references and `depends_on` entries into graph edges, binds imports
//! against the registry or the current batch, and computes a stable
//! topological order. Nothing external is touched: any error here is a
//! planning error.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::graph::NodeIndex;
use stackwire_common::error::{Result, StackwireError};
use stackwire_registry::ParameterRegistry;

use crate::graph::DependencyGraph;
use crate::model::{Reference, ResourceDeclaration, StackUnit};
use crate::validator;

/// How a cross-stack import is satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportBinding {
    /// The registry already holds the value.
    Resolved(String),
    /// Another stack of the current batch exports it.
    Deferred {
        /// The exporting stack, applied before this one.
        stack: String,
    },
}

/// A stack's declarations together with their dependency graph and order.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    unit: StackUnit,
    graph: DependencyGraph<String>,
    index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
    imports: BTreeMap<String, ImportBinding>,
}

impl ResourceGraph {
    /// Stack name.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.unit.name
    }

    /// The stack the graph was built from.
    #[must_use]
    pub const fn unit(&self) -> &StackUnit {
        &self.unit
    }

    /// Declarations in topological order.
    pub fn ordered(&self) -> impl DoubleEndedIterator<Item = &ResourceDeclaration> + '_ {
        self.order
            .iter()
            .map(|idx| &self.unit.resources[idx.index()])
    }

    /// Declarations in reverse topological order, for teardown.
    pub fn reverse_ordered(&self) -> impl Iterator<Item = &ResourceDeclaration> + '_ {
        self.ordered().rev()
    }

    /// Logical ids in topological order.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.ordered().map(|d| d.id.as_str()).collect()
    }

    /// Looks up a declaration by logical id.
    #[must_use]
    pub fn declaration(&self, id: &str) -> Option<&ResourceDeclaration> {
        self.index
            .get(id)
            .map(|idx| &self.unit.resources[idx.index()])
    }

    /// Ids `id` directly depends on, in declaration order.
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, true)
    }

    /// Ids directly depending on `id`, in declaration order.
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, false)
    }

    /// The given ids plus everything they transitively depend on.
    #[must_use]
    pub fn transitive_dependencies<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let roots: Vec<NodeIndex> = ids
            .into_iter()
            .filter_map(|id| self.index.get(id).copied())
            .collect();
        self.graph
            .transitive_dependencies(&roots)
            .into_iter()
            .map(|idx| self.unit.resources[idx.index()].id.clone())
            .collect()
    }

    /// Import bindings keyed by export name. Empty for teardown graphs.
    #[must_use]
    pub const fn imports(&self) -> &BTreeMap<String, ImportBinding> {
        &self.imports
    }

    /// Stacks of the batch this stack waits for.
    #[must_use]
    pub fn deferred_stacks(&self) -> BTreeSet<&str> {
        self.imports
            .values()
            .filter_map(|binding| match binding {
                ImportBinding::Deferred { stack } => Some(stack.as_str()),
                ImportBinding::Resolved(_) => None,
            })
            .collect()
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Whether the stack declares no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    fn neighbours(&self, id: &str, dependencies: bool) -> Vec<&str> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let found = if dependencies {
            self.graph.dependencies(idx)
        } else {
            self.graph.dependents(idx)
        };
        found
            .into_iter()
            .map(|n| self.unit.resources[n.index()].id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode<'a> {
    Bind {
        registry: &'a ParameterRegistry,
        batch_exports: &'a BTreeMap<String, String>,
    },
    Teardown,
}

/// Builds [`ResourceGraph`]s.
#[derive(Debug, Clone, Copy)]
pub struct ResourceGraphBuilder<'a> {
    mode: Mode<'a>,
}

impl<'a> ResourceGraphBuilder<'a> {
    /// A builder that binds imports. `batch_exports` maps each export name
    /// produced in the current batch to its stack.
    #[must_use]
    pub const fn new(
        registry: &'a ParameterRegistry,
        batch_exports: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            mode: Mode::Bind {
                registry,
                batch_exports,
            },
        }
    }

    /// A builder for destroy runs: imports are not bound, so a stack can be
    /// torn down after its exporters are gone.
    #[must_use]
    pub const fn teardown() -> Self {
        Self {
            mode: Mode::Teardown,
        }
    }

    /// Builds the graph of one stack.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::UnresolvedReference`] for a dangling local
    /// reference, parameter, or import, [`StackwireError::CyclicDependency`]
    /// when declarations form a cycle, and [`StackwireError::Config`] when the
    /// stack fails validation.
    pub fn build(&self, stack: &StackUnit) -> Result<ResourceGraph> {
        validator::validate(stack)?;

        let mut graph = DependencyGraph::new();
        let mut index = HashMap::new();
        for resource in &stack.resources {
            let idx = graph.add_node(resource.id.clone());
            let _ = index.insert(resource.id.clone(), idx);
        }

        let mut imports = BTreeMap::new();
        for resource in &stack.resources {
            let own = index[&resource.id];
            for reference in resource.references() {
                if let Some(dependency) =
                    self.check_reference(stack, &resource.id, reference, &index, &mut imports)?
                {
                    graph.add_dependency(own, dependency);
                }
            }
            for explicit in &resource.depends_on {
                let dependency = index.get(explicit).copied().ok_or_else(|| {
                    unresolved(stack, &resource.id, format!("depends_on:{explicit}"))
                })?;
                graph.add_dependency(own, dependency);
            }
        }

        for output in &stack.outputs {
            let holder = format!("outputs.{}", output.name);
            for reference in output.value.references() {
                let _ = self.check_reference(stack, &holder, reference, &index, &mut imports)?;
            }
        }

        let order = graph.resolve_order()?;
        tracing::debug!(
            stack = %stack.name,
            resources = order.len(),
            imports = imports.len(),
            "resource graph built"
        );
        Ok(ResourceGraph {
            unit: stack.clone(),
            graph,
            index,
            order,
            imports,
        })
    }

    /// Validates one reference, returning the local node it depends on.
    fn check_reference(
        &self,
        stack: &StackUnit,
        holder: &str,
        reference: &Reference,
        index: &HashMap<String, NodeIndex>,
        imports: &mut BTreeMap<String, ImportBinding>,
    ) -> Result<Option<NodeIndex>> {
        match reference {
            Reference::Attribute { resource, .. } => index
                .get(resource)
                .copied()
                .map(Some)
                .ok_or_else(|| unresolved(stack, holder, reference.to_string())),
            Reference::Parameter { name } => {
                let declared = stack
                    .parameters
                    .get(name)
                    .and_then(|p| p.effective())
                    .is_some();
                if declared {
                    Ok(None)
                } else {
                    Err(unresolved(stack, holder, reference.to_string()))
                }
            }
            Reference::Import { export_name } => {
                if !imports.contains_key(export_name) {
                    if let Some(binding) = self.bind_import(stack, holder, export_name)? {
                        let _ = imports.insert(export_name.clone(), binding);
                    }
                }
                Ok(None)
            }
        }
    }

    fn bind_import(
        &self,
        stack: &StackUnit,
        holder: &str,
        export_name: &str,
    ) -> Result<Option<ImportBinding>> {
        let Mode::Bind {
            registry,
            batch_exports,
        } = self.mode
        else {
            return Ok(None);
        };
        if let Some(exporter) = batch_exports.get(export_name) {
            if exporter == &stack.name {
                return Err(StackwireError::StackOrdering {
                    cycle: vec![stack.name.clone()],
                });
            }
            return Ok(Some(ImportBinding::Deferred {
                stack: exporter.clone(),
            }));
        }
        match registry.lookup(export_name)? {
            Some(value) => Ok(Some(ImportBinding::Resolved(value))),
            None => Err(unresolved(stack, holder, format!("import:{export_name}"))),
        }
    }
}

fn unresolved(stack: &StackUnit, holder: &str, reference: String) -> StackwireError {
    StackwireError::UnresolvedReference {
        stack: stack.name.clone(),
        resource: holder.to_string(),
        reference,
    }
}
