//! Multi-stack composition.
//!
//! The composer prepares a batch of stacks (removal-policy defaults, tag
//! merging), checks that export names are unambiguous, and orders stacks so
//! that every exporter is applied before its importers.

use std::collections::{BTreeMap, HashMap};

use stackwire_common::config::StackwireConfig;
use stackwire_common::error::{Result, StackwireError};
use stackwire_common::types::RemovalPolicy;
use stackwire_registry::ParameterRegistry;

use crate::graph::DependencyGraph;
use crate::model::{StackUnit, Value};
use crate::validator;

/// Property receiving merged tags.
pub const TAGS_PROPERTY: &str = "tags";

/// Prepares and orders batches of stacks.
#[derive(Debug, Clone, Default)]
pub struct StackComposer {
    default_removal_policy: RemovalPolicy,
    tags: BTreeMap<String, String>,
}

impl StackComposer {
    /// A composer with the `Destroy` default and no global tags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A composer using the configured removal policy and tags.
    #[must_use]
    pub fn from_config(config: &StackwireConfig) -> Self {
        Self {
            default_removal_policy: config.default_removal_policy,
            tags: config.tags.clone(),
        }
    }

    /// Sets the removal policy given to declarations without one.
    #[must_use]
    pub const fn with_default_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.default_removal_policy = policy;
        self
    }

    /// Adds a tag merged into every resource.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.tags.insert(key.into(), value.into());
        self
    }

    /// Validates a batch and fills in defaults.
    ///
    /// Every resource without a removal policy receives the default. Tags
    /// are merged into each resource's `tags` map; on conflicts the resource
    /// wins over the stack, which wins over the composer. A `tags` property
    /// that is not a map is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::Config`] for invalid or duplicate stacks.
    pub fn prepare(&self, mut stacks: Vec<StackUnit>) -> Result<Vec<StackUnit>> {
        validator::validate_batch(&stacks)?;
        for stack in &mut stacks {
            let mut tags = self.tags.clone();
            tags.extend(stack.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

            for resource in &mut stack.resources {
                let _ = resource
                    .removal_policy
                    .get_or_insert(self.default_removal_policy);
                if tags.is_empty() {
                    continue;
                }
                let merged = resource
                    .properties
                    .entry(TAGS_PROPERTY.to_string())
                    .or_insert_with(|| Value::Map(BTreeMap::new()));
                if let Value::Map(existing) = merged {
                    for (key, value) in &tags {
                        let _ = existing
                            .entry(key.clone())
                            .or_insert_with(|| Value::from(value.as_str()));
                    }
                }
            }
            let _ = validator::audit(stack);
        }
        Ok(stacks)
    }

    /// Maps every export name produced in the batch to its stack.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::DuplicateExport`] when two stacks of the
    /// batch publish the same name.
    pub fn batch_exports(stacks: &[StackUnit]) -> Result<BTreeMap<String, String>> {
        let mut exports: BTreeMap<String, String> = BTreeMap::new();
        for stack in stacks {
            for export_name in stack.export_names() {
                if let Some(owner) = exports.get(export_name) {
                    if owner != &stack.name {
                        return Err(StackwireError::DuplicateExport {
                            export_name: export_name.to_string(),
                            owner: owner.clone(),
                            requested_by: stack.name.clone(),
                        });
                    }
                }
                let _ = exports.insert(export_name.to_string(), stack.name.clone());
            }
        }
        Ok(exports)
    }

    /// Orders a batch for apply and returns stack positions.
    ///
    /// An importing stack comes strictly after its exporter; otherwise batch
    /// order is kept.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::DuplicateExport`] when a batch export is
    /// owned by a live stack outside the batch, and
    /// [`StackwireError::StackOrdering`] for cross-stack cycles, including a
    /// stack importing its own export.
    pub fn order(&self, stacks: &[StackUnit], registry: &ParameterRegistry) -> Result<Vec<usize>> {
        let exports = Self::batch_exports(stacks)?;
        for (export_name, stack) in &exports {
            if let Some(owner) = registry.owner_of(export_name)? {
                if owner != *stack && !stacks.iter().any(|s| s.name == owner) {
                    return Err(StackwireError::DuplicateExport {
                        export_name: export_name.clone(),
                        owner,
                        requested_by: stack.clone(),
                    });
                }
            }
        }
        let order = Self::stack_order(stacks, &exports)?;
        tracing::info!(
            stacks = ?order.iter().map(|&i| stacks[i].name.as_str()).collect::<Vec<_>>(),
            "stack order resolved"
        );
        Ok(order)
    }

    /// Orders a batch for destroy: importers before exporters.
    ///
    /// The registry is not consulted, so stacks whose exporters are already
    /// gone can still be torn down.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::StackOrdering`] for cross-stack cycles.
    pub fn teardown_order(&self, stacks: &[StackUnit]) -> Result<Vec<usize>> {
        let exports = Self::batch_exports(stacks)?;
        let mut order = Self::stack_order(stacks, &exports)?;
        order.reverse();
        Ok(order)
    }

    fn stack_order(stacks: &[StackUnit], exports: &BTreeMap<String, String>) -> Result<Vec<usize>> {
        let mut graph = DependencyGraph::new();
        let positions: HashMap<&str, usize> = stacks
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        let nodes: Vec<_> = stacks.iter().map(|s| graph.add_node(s.name.clone())).collect();

        for (i, stack) in stacks.iter().enumerate() {
            for import in stack.import_names() {
                let Some(exporter) = exports.get(import) else {
                    continue;
                };
                if exporter == &stack.name {
                    return Err(StackwireError::StackOrdering {
                        cycle: vec![stack.name.clone()],
                    });
                }
                if let Some(&j) = positions.get(exporter.as_str()) {
                    graph.add_dependency(nodes[i], nodes[j]);
                }
            }
        }

        let order = graph.resolve_order().map_err(|e| match e {
            StackwireError::CyclicDependency { cycle } => StackwireError::StackOrdering { cycle },
            other => other,
        })?;
        Ok(order.into_iter().map(petgraph::graph::NodeIndex::index).collect())
    }
}

#[cfg(test)]
mod tests {
    use stackwire_common::types::ResourceKind;
    use stackwire_registry::NewParameter;

    use super::*;
    use crate::model::{OutputDeclaration, ResourceDeclaration};

    fn exporting(name: &str, export: &str) -> StackUnit {
        let mut stack = StackUnit::new(name);
        stack.resources.push(ResourceDeclaration::new("Param", ResourceKind::Parameter));
        stack.outputs.push(OutputDeclaration {
            name: export.into(),
            value: Value::attr("Param", "value"),
            export_name: Some(export.into()),
            description: None,
        });
        stack
    }

    fn importing(name: &str, imports: &[&str]) -> StackUnit {
        let mut stack = StackUnit::new(name);
        for (i, import) in imports.iter().enumerate() {
            stack.resources.push(
                ResourceDeclaration::new(format!("R{i}"), ResourceKind::Bucket)
                    .with_property("name", Value::import(*import)),
            );
        }
        stack
    }

    fn names(stacks: &[StackUnit], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| stacks[i].name.clone()).collect()
    }

    #[test]
    fn importer_comes_after_exporter() {
        let stacks = vec![
            importing("config-stack", &["projectAzul"]),
            exporting("parameterstore-stack", "projectAzul"),
        ];
        let registry = ParameterRegistry::in_memory();
        let order = StackComposer::new().order(&stacks, &registry).expect("order");
        assert_eq!(names(&stacks, &order), vec!["parameterstore-stack", "config-stack"]);

        let teardown = StackComposer::new().teardown_order(&stacks).expect("teardown");
        assert_eq!(names(&stacks, &teardown), vec!["config-stack", "parameterstore-stack"]);
    }

    #[test]
    fn independent_stacks_keep_batch_order() {
        let stacks = vec![StackUnit::new("b"), StackUnit::new("a"), StackUnit::new("c")];
        let registry = ParameterRegistry::in_memory();
        let order = StackComposer::new().order(&stacks, &registry).expect("order");
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_export_within_batch_is_rejected() {
        let stacks = vec![exporting("a", "shared"), exporting("b", "shared")];
        let err = StackComposer::batch_exports(&stacks).unwrap_err();
        assert!(matches!(err, StackwireError::DuplicateExport { ref owner, .. } if owner == "a"));
    }

    #[test]
    fn export_owned_outside_the_batch_is_rejected() {
        let registry = ParameterRegistry::in_memory();
        let _ = registry
            .export("live-stack", NewParameter::new("p", "v").exported_as("projectAzul"))
            .expect("export");
        let stacks = vec![exporting("parameterstore-stack", "projectAzul")];
        let err = StackComposer::new().order(&stacks, &registry).unwrap_err();
        assert!(
            matches!(err, StackwireError::DuplicateExport { ref owner, .. } if owner == "live-stack"),
            "got: {err}"
        );
    }

    #[test]
    fn reapplying_the_owner_is_not_a_duplicate() {
        let registry = ParameterRegistry::in_memory();
        let _ = registry
            .export("parameterstore-stack", NewParameter::new("p", "v").exported_as("projectAzul"))
            .expect("export");
        let stacks = vec![exporting("parameterstore-stack", "projectAzul")];
        assert!(StackComposer::new().order(&stacks, &registry).is_ok());
    }

    #[test]
    fn cross_stack_cycle_is_an_ordering_error() {
        let mut a = exporting("a", "fromA");
        a.resources.push(
            ResourceDeclaration::new("Use", ResourceKind::Bucket).with_property("x", Value::import("fromB")),
        );
        let mut b = exporting("b", "fromB");
        b.resources.push(
            ResourceDeclaration::new("Use", ResourceKind::Bucket).with_property("x", Value::import("fromA")),
        );
        let registry = ParameterRegistry::in_memory();
        let err = StackComposer::new().order(&[a, b], &registry).unwrap_err();
        assert!(
            matches!(err, StackwireError::StackOrdering { ref cycle } if cycle == &vec!["a".to_string(), "b".to_string()]),
            "got: {err}"
        );
    }

    #[test]
    fn self_import_is_an_ordering_error() {
        let mut stack = exporting("loop", "loopExport");
        stack.resources.push(
            ResourceDeclaration::new("Use", ResourceKind::Bucket)
                .with_property("x", Value::import("loopExport")),
        );
        let registry = ParameterRegistry::in_memory();
        let err = StackComposer::new().order(&[stack], &registry).unwrap_err();
        assert!(matches!(err, StackwireError::StackOrdering { ref cycle } if cycle == &vec!["loop".to_string()]));
    }

    #[test]
    fn prepare_fills_policies_and_merges_tags() {
        let mut stack = StackUnit::new("config-stack");
        let _ = stack.tags.insert("Proyecto".into(), "vectorAzul".into());
        stack.resources.push(
            ResourceDeclaration::new("Bucket", ResourceKind::Bucket)
                .with_property("tags", Value::map([("Proyecto", "override")])),
        );
        stack.resources.push(
            ResourceDeclaration::new("Logs", ResourceKind::Bucket).with_removal_policy(RemovalPolicy::Retain),
        );
        let composer = StackComposer::new()
            .with_default_removal_policy(RemovalPolicy::Destroy)
            .with_tag("Owner", "platform");

        let prepared = composer.prepare(vec![stack]).expect("prepare");
        let bucket = &prepared[0].resources[0];
        assert_eq!(bucket.removal_policy, Some(RemovalPolicy::Destroy));
        assert_eq!(
            bucket.properties["tags"],
            Value::map([("Owner", "platform"), ("Proyecto", "override")])
        );
        let logs = &prepared[0].resources[1];
        assert_eq!(logs.removal_policy, Some(RemovalPolicy::Retain));
        assert_eq!(
            logs.properties["tags"],
            Value::map([("Owner", "platform"), ("Proyecto", "vectorAzul")])
        );
    }

    #[test]
    fn prepare_rejects_duplicate_stack_names() {
        let err = StackComposer::new()
            .prepare(vec![StackUnit::new("a"), StackUnit::new("a")])
            .unwrap_err();
        assert!(matches!(err, StackwireError::Config { .. }));
    }
}
