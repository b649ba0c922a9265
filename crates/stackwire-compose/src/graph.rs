//! Dependency graph management using `petgraph`.
//!
//! The graph knows nothing about resource kinds. Both per-stack resource
//! graphs and the cross-stack ordering use it.
//!
//! Edges point from a dependency to its dependent, so a node's incoming
//! neighbours are the nodes it depends on.

use std::collections::BTreeSet;
use std::fmt;

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use stackwire_common::error::{Result, StackwireError};

/// A directed dependency graph with deterministic ordering.
#[derive(Debug, Clone)]
pub struct DependencyGraph<N> {
    graph: petgraph::Graph<N, ()>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

impl<N> DependencyGraph<N> {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: petgraph::Graph::new(),
        }
    }

    /// Adds a node. Insertion order is the tie-break for ordering.
    pub fn add_node(&mut self, node: N) -> NodeIndex {
        self.graph.add_node(node)
    }

    /// Adds a dependency edge: `dependent` depends on `dependency`.
    /// Repeated edges are collapsed.
    pub fn add_dependency(&mut self, dependent: NodeIndex, dependency: NodeIndex) {
        let _ = self.graph.update_edge(dependency, dependent, ());
    }

    /// Returns the payload of a node.
    #[must_use]
    pub fn node(&self, idx: NodeIndex) -> Option<&N> {
        self.graph.node_weight(idx)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Nodes `idx` depends on, in insertion order.
    #[must_use]
    pub fn dependencies(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(idx, Direction::Incoming)
    }

    /// Nodes depending on `idx`, in insertion order.
    #[must_use]
    pub fn dependents(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(idx, Direction::Outgoing)
    }

    /// Every node reachable from `roots` through "depends on" edges,
    /// including the roots themselves.
    #[must_use]
    pub fn transitive_dependencies(&self, roots: &[NodeIndex]) -> BTreeSet<NodeIndex> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeIndex> = roots.to_vec();
        while let Some(idx) = stack.pop() {
            if seen.insert(idx) {
                stack.extend(self.dependencies(idx));
            }
        }
        seen
    }

    /// Finds a cycle with a depth-first traversal over "depends on" edges.
    ///
    /// Returns the cycle's nodes in dependency order, starting from the
    /// first node of the cycle reached by the traversal.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<NodeIndex>> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut path = Vec::new();
        for idx in self.graph.node_indices() {
            if marks[idx.index()] == Mark::Unvisited {
                if let Some(cycle) = self.visit(idx, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(
        &self,
        idx: NodeIndex,
        marks: &mut [Mark],
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        marks[idx.index()] = Mark::Visiting;
        path.push(idx);
        for dep in self.dependencies(idx) {
            match marks[dep.index()] {
                Mark::Visiting => {
                    let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                    return Some(path[start..].to_vec());
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(dep, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Visited => {}
            }
        }
        let _ = path.pop();
        marks[idx.index()] = Mark::Visited;
        None
    }

    /// Kahn's algorithm; ready nodes are taken in insertion order.
    /// Returns `None` if some node never became ready.
    fn stable_toposort(&self) -> Option<Vec<NodeIndex>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.dependencies(idx).len())
            .collect();
        let mut ready: BTreeSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for dependent in self.dependents(idx) {
                let degree = &mut in_degree[dependent.index()];
                *degree -= 1;
                if *degree == 0 {
                    let _ = ready.insert(dependent);
                }
            }
        }
        (order.len() == self.graph.node_count()).then_some(order)
    }

    fn sorted_neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        out.sort_unstable();
        out
    }
}

impl<N: fmt::Display> DependencyGraph<N> {
    /// Returns a topological order: every dependency precedes its dependents,
    /// and independent nodes keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::CyclicDependency`] naming the cycle.
    pub fn resolve_order(&self) -> Result<Vec<NodeIndex>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(StackwireError::CyclicDependency {
                cycle: self.names(&cycle),
            });
        }
        self.stable_toposort()
            .ok_or_else(|| StackwireError::CyclicDependency { cycle: Vec::new() })
    }

    /// Like [`resolve_order`](Self::resolve_order), returning node names.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::CyclicDependency`] naming the cycle.
    pub fn resolve_names(&self) -> Result<Vec<String>> {
        self.resolve_order().map(|order| self.names(&order))
    }

    fn names(&self, indices: &[NodeIndex]) -> Vec<String> {
        indices
            .iter()
            .filter_map(|&idx| self.graph.node_weight(idx).map(ToString::to_string))
            .collect()
    }
}

impl<N> Default for DependencyGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}
