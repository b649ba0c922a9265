//! Node lifecycle tracking.
//!
//! Every resource of a run moves through [`NodeState`]s. The tracker
//! rejects transitions the state machine does not permit, which would
//! indicate a provisioner bug rather than a provider failure.

use std::collections::BTreeMap;

use stackwire_common::error::{Result, StackwireError};
use stackwire_common::types::{NodeState, ResourceAddress};

/// Current state of every node touched by a run.
#[derive(Debug, Clone, Default)]
pub struct NodeTracker {
    states: BTreeMap<ResourceAddress, NodeState>,
}

impl NodeTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node in `state` without a transition check.
    pub fn register(&mut self, address: ResourceAddress, state: NodeState) {
        let _ = self.states.insert(address, state);
    }

    /// Moves a node to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::InvalidTransition`] if the state machine
    /// does not permit the move, or [`StackwireError::NotFound`] for an
    /// unregistered node.
    pub fn transition(&mut self, address: &ResourceAddress, next: NodeState) -> Result<()> {
        let current = self
            .states
            .get_mut(address)
            .ok_or_else(|| StackwireError::NotFound {
                kind: "node",
                id: address.to_string(),
            })?;
        if !current.can_transition_to(next) {
            return Err(StackwireError::InvalidTransition {
                resource: address.to_string(),
                from: *current,
                to: next,
            });
        }
        tracing::debug!(resource = %address, from = %current, to = %next, "node transition");
        *current = next;
        Ok(())
    }

    /// Returns the state of a node.
    #[must_use]
    pub fn state(&self, address: &ResourceAddress) -> Option<NodeState> {
        self.states.get(address).copied()
    }

    /// Nodes currently in `state`, in address order.
    #[must_use]
    pub fn in_state(&self, state: NodeState) -> Vec<&ResourceAddress> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(address, _)| address)
            .collect()
    }
}
