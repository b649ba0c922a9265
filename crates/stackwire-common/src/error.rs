//! Unified error types for the Stackwire workspace.
//!
//! Graph-construction errors (`CyclicDependency`, `UnresolvedReference`,
//! `StackOrdering`, `DuplicateExport`) are raised before any external side
//! effect. Runtime errors (`ResourceOperation`, `Cancelled`, `ExportInUse`)
//! are reported per resource inside apply and destroy results.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StackwireError {
    /// An export name is already owned by a different live stack.
    #[error("export \"{export_name}\" is already owned by stack \"{owner}\" (requested by \"{requested_by}\")")]
    DuplicateExport {
        /// The contested export name.
        export_name: String,
        /// Stack currently owning the export.
        owner: String,
        /// Stack that attempted to export the same name.
        requested_by: String,
    },

    /// An export cannot be removed while live stacks still import it.
    #[error("export \"{export_name}\" is still imported by: {}", importers.join(", "))]
    ExportInUse {
        /// The export that was about to be revoked.
        export_name: String,
        /// Stacks that still import it.
        importers: Vec<String>,
    },

    /// A reference did not resolve to exactly one value.
    #[error("unresolved reference {reference} in {stack}/{resource}")]
    UnresolvedReference {
        /// Stack containing the referring declaration.
        stack: String,
        /// Resource (or output) that holds the reference.
        resource: String,
        /// Human-readable form of the reference.
        reference: String,
    },

    /// Resource declarations form a cycle.
    #[error("cyclic dependency detected: {}", format_cycle(cycle))]
    CyclicDependency {
        /// Node sequence of the cycle, without the closing repetition.
        cycle: Vec<String>,
    },

    /// No valid total order exists across the stacks of a batch.
    #[error("cannot order stacks, cross-stack cycle: {}", format_cycle(cycle))]
    StackOrdering {
        /// Stack names forming the cycle.
        cycle: Vec<String>,
    },

    /// A provider create, update, or delete call failed or timed out.
    #[error("operation on {stack}/{resource} failed: {message}")]
    ResourceOperation {
        /// Stack owning the resource.
        stack: String,
        /// Logical resource id.
        resource: String,
        /// Provider failure message.
        message: String,
    },

    /// An apply was cancelled between two node operations.
    #[error("apply cancelled before {stack}/{resource}")]
    Cancelled {
        /// Stack of the first resource that was not attempted.
        stack: String,
        /// First resource that was not attempted.
        resource: String,
    },

    /// A lifecycle transition not permitted by the node state machine.
    #[error("invalid transition for {resource}: {from} -> {to}")]
    InvalidTransition {
        /// Logical resource id.
        resource: String,
        /// State before the attempted transition.
        from: crate::types::NodeState,
        /// Requested target state.
        to: crate::types::NodeState,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration or declaration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required item was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing item.
        kind: &'static str,
        /// Identifier of the missing item.
        id: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl StackwireError {
    /// Returns `true` for errors raised while building graphs and orders,
    /// before any external side effect took place.
    #[must_use]
    pub const fn is_planning_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateExport { .. }
                | Self::UnresolvedReference { .. }
                | Self::CyclicDependency { .. }
                | Self::StackOrdering { .. }
        )
    }
}

/// Renders a cycle as `a -> b -> a`.
fn format_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => {
            let mut path = cycle.join(" -> ");
            path.push_str(" -> ");
            path.push_str(first);
            path
        }
        None => String::from("<empty>"),
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StackwireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_closes_the_loop() {
        let err = StackwireError::CyclicDependency {
            cycle: vec!["api".into(), "authorizer".into()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic dependency detected: api -> authorizer -> api"
        );
    }

    #[test]
    fn export_in_use_lists_importers() {
        let err = StackwireError::ExportInUse {
            export_name: "projectAzul".into(),
            importers: vec!["config-stack".into(), "web-stack".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("config-stack, web-stack"), "got: {msg}");
    }

    #[test]
    fn planning_errors_are_classified() {
        assert!(StackwireError::StackOrdering { cycle: vec![] }.is_planning_error());
        assert!(
            !StackwireError::Cancelled {
                stack: "s".into(),
                resource: "r".into()
            }
            .is_planning_error()
        );
    }
}
