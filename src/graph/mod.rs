//! Dependency graph construction, cycle detection, and layered scheduling.
//!
//! Nodes are `(Kind, Name)` identities, never object handles; edges point
//! from dependent to dependency and traversal goes through a flat map, so
//! the in-memory structure stays acyclic regardless of input validity and
//! cycle detection is a pure string-level algorithm.
//!
//! Dependencies that exist only in persisted state join the graph as
//! external leaf nodes: they are ordered but never executed.

use crate::core::TomeiError;
use crate::resource::{Resource, ResourceId};
use crate::state::State;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Color states for cycle detection using DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not yet visited.
    White,
    /// In the current DFS stack.
    Gray,
    /// Fully visited.
    Black,
}

#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceId, ()>,
    node_map: HashMap<ResourceId, NodeIndex>,
    external: HashSet<ResourceId>,
}

impl DependencyGraph {
    /// Builds the graph over the declared resources, resolving references
    /// against the declaration set first and persisted state second. A
    /// reference satisfied by neither is a missing-ref error.
    pub fn build(resources: &[Resource], state: &State) -> Result<Self, TomeiError> {
        let mut builder = Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
            external: HashSet::new(),
        };

        let declared: HashSet<ResourceId> = resources.iter().map(Resource::id).collect();
        for resource in resources {
            builder.ensure_node(resource.id());
        }

        for resource in resources {
            let from = resource.id();
            for dep in resource.dependencies() {
                if !declared.contains(&dep) {
                    if !state.contains(&dep) {
                        return Err(TomeiError::MissingReference {
                            resource: from.qualified(),
                            reference: dep.qualified(),
                        });
                    }
                    builder.external.insert(dep.clone());
                }
                builder.add_edge(from.clone(), dep);
            }
        }

        Ok(builder)
    }

    fn ensure_node(&mut self, id: ResourceId) -> NodeIndex {
        if let Some(&index) = self.node_map.get(&id) {
            index
        } else {
            let index = self.graph.add_node(id.clone());
            self.node_map.insert(id, index);
            index
        }
    }

    fn add_edge(&mut self, from: ResourceId, to: ResourceId) {
        let from_idx = self.ensure_node(from);
        let to_idx = self.ensure_node(to);
        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    /// Whether a node is present only in persisted state.
    pub fn is_external(&self, id: &ResourceId) -> bool {
        self.external.contains(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Direct dependencies of a node.
    pub fn dependencies(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.node_map.get(id).map_or_else(Vec::new, |&idx| {
            self.graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|n| self.graph[n].clone())
                .collect()
        })
    }

    /// Nodes that depend on `id`, directly or transitively.
    pub fn transitive_dependents(&self, id: &ResourceId) -> HashSet<ResourceId> {
        let mut dependents = HashSet::new();
        let Some(&start) = self.node_map.get(id) else {
            return dependents;
        };
        let mut queue = vec![start];
        while let Some(current) = queue.pop() {
            for neighbor in self.graph.neighbors_directed(current, Direction::Incoming) {
                if dependents.insert(self.graph[neighbor].clone()) {
                    queue.push(neighbor);
                }
            }
        }
        dependents
    }

    /// Detects cycles with a three-colour DFS; the error carries the full
    /// cycle path.
    pub fn detect_cycles(&self) -> Result<(), TomeiError> {
        let mut colors: HashMap<NodeIndex, Color> = HashMap::new();
        let mut path: Vec<ResourceId> = Vec::new();

        for node in self.graph.node_indices() {
            colors.insert(node, Color::White);
        }

        for node in self.graph.node_indices() {
            if matches!(colors.get(&node), Some(Color::White))
                && let Some(cycle) = self.dfs_visit(node, &mut colors, &mut path)
            {
                let cycle_str =
                    cycle.iter().map(ResourceId::qualified).collect::<Vec<_>>().join(" → ");
                return Err(TomeiError::DependencyCycle { path: cycle_str });
            }
        }

        Ok(())
    }

    fn dfs_visit(
        &self,
        node: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        path: &mut Vec<ResourceId>,
    ) -> Option<Vec<ResourceId>> {
        colors.insert(node, Color::Gray);
        path.push(self.graph[node].clone());

        for neighbor in self.graph.neighbors(node) {
            match colors.get(&neighbor) {
                Some(Color::Gray) => {
                    // Back-edge: close the cycle from its first appearance.
                    let cycle_start =
                        path.iter().position(|n| *n == self.graph[neighbor]).unwrap_or(0);
                    let mut cycle = path[cycle_start..].to_vec();
                    cycle.push(self.graph[neighbor].clone());
                    return Some(cycle);
                }
                Some(Color::White) => {
                    if let Some(cycle) = self.dfs_visit(neighbor, colors, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    /// Kahn's algorithm over the dependency direction: layer `k` holds the
    /// nodes whose dependencies all sit in layers `< k`. Within a layer,
    /// nodes sort by kind priority then name, which makes execution order
    /// and failure reports deterministic.
    ///
    /// Fails with the cycle path if the graph is not a DAG.
    pub fn layers(&self) -> Result<Vec<Vec<ResourceId>>, TomeiError> {
        self.detect_cycles()?;

        let mut remaining: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Outgoing).count()))
            .collect();

        let mut layers = Vec::new();
        let mut placed = 0usize;
        while placed < self.graph.node_count() {
            let mut layer: Vec<NodeIndex> = remaining
                .iter()
                .filter_map(|(&idx, &count)| (count == 0).then_some(idx))
                .collect();
            // Cycles were ruled out above, so progress is guaranteed.
            debug_assert!(!layer.is_empty());

            layer.sort_by(|&a, &b| {
                let (na, nb) = (&self.graph[a], &self.graph[b]);
                (na.kind.priority(), &na.name).cmp(&(nb.kind.priority(), &nb.name))
            });

            for &idx in &layer {
                remaining.remove(&idx);
                for dependent in self.graph.neighbors_directed(idx, Direction::Incoming) {
                    if let Some(count) = remaining.get_mut(&dependent) {
                        *count -= 1;
                    }
                }
            }

            placed += layer.len();
            layers.push(layer.into_iter().map(|idx| self.graph[idx].clone()).collect());
        }

        Ok(layers)
    }
}
