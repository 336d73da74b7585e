//! Dependency Graph
//!
//! Edges are recorded while atoms compute: if `A` read `B`, there is an edge
//! `B -> A` ("A depends on B").
//!
//! # Invalidation
//!
//! When `B` changes we need every node whose cached value was derived from
//! it, directly or transitively:
//!
//! 1. Walk dependents depth-first from `B`, visiting each node once.
//! 2. Sort the reached nodes topologically so dependencies come first.
//! 3. Nodes Kahn's algorithm cannot place sit on a cycle. They are still
//!    invalidated but reported back so the store can surface the error.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use super::node::{GraphNode, NodeId, ScopeId};

/// Result of propagating a change.
#[derive(Debug, Default)]
pub struct Invalidation {
    /// Reached nodes, dependencies before dependents.
    pub order: Vec<NodeId>,
    /// Reached nodes that lie on a cycle.
    pub cyclic: Vec<NodeId>,
}

/// All nodes of a store, across scopes.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: IndexMap<NodeId, GraphNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a node exists.
    pub fn add_node(&mut self, node_id: NodeId) {
        self.nodes.entry(node_id).or_default();
    }

    /// Remove a node and every edge touching it. Returns the node so callers
    /// can follow its former dependencies.
    pub fn remove_node(&mut self, node_id: &NodeId) -> Option<GraphNode> {
        let node = self.nodes.shift_remove(node_id)?;
        for dependency in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(dependency) {
                dep.remove_dependent(node_id);
            }
        }
        for dependent in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent) {
                dependent.remove_dependency(node_id);
            }
        }
        Some(node)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    #[cfg(test)]
    pub(crate) fn get_node(&self, node_id: &NodeId) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    pub fn has_dependents(&self, node_id: &NodeId) -> bool {
        self.nodes
            .get(node_id)
            .is_some_and(|node| !node.dependents().is_empty())
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        self.add_node(dependency.clone());
        self.add_node(dependent.clone());
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent.clone());
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    #[cfg(test)]
    pub(crate) fn remove_edge(&mut self, dependency: &NodeId, dependent: &NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace the dependencies of `dependent` with `dependencies`.
    ///
    /// Returns the former dependencies that are no longer read.
    pub fn replace_dependencies(
        &mut self,
        dependent: &NodeId,
        dependencies: impl IntoIterator<Item = NodeId>,
    ) -> Vec<NodeId> {
        self.add_node(dependent.clone());
        let previous = self
            .nodes
            .get_mut(dependent)
            .map(GraphNode::take_dependencies)
            .unwrap_or_default();
        for dependency in &previous {
            if let Some(dep_node) = self.nodes.get_mut(dependency) {
                dep_node.remove_dependent(dependent);
            }
        }

        let mut current = HashSet::new();
        for dependency in dependencies {
            current.insert(dependency.clone());
            self.add_edge(dependency, dependent.clone());
        }

        previous
            .into_iter()
            .filter(|dependency| !current.contains(dependency))
            .collect()
    }

    /// Collect every node downstream of `source`, excluding `source` itself
    /// unless it is reachable from itself.
    pub fn mark_changed(&self, source: &NodeId) -> Invalidation {
        let mut reached = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        if let Some(node) = self.nodes.get(source) {
            stack.extend(node.dependents().iter().rev().cloned());
        }

        while let Some(node_id) = stack.pop() {
            if !visited.insert(node_id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                stack.extend(
                    node.dependents()
                        .iter()
                        .rev()
                        .filter(|dependent| !visited.contains(*dependent))
                        .cloned(),
                );
            }
            reached.push(node_id);
        }

        let order = self.topological_sort(&reached);
        let placed: HashSet<_> = order.iter().collect();
        let mut cyclic: Vec<NodeId> = reached
            .iter()
            .filter(|node_id| !placed.contains(node_id))
            .cloned()
            .collect();
        if visited.contains(source) && !cyclic.contains(source) {
            cyclic.push(source.clone());
        }

        let mut order = order;
        order.extend(cyclic.iter().filter(|id| *id != source).cloned());
        Invalidation { order, cyclic }
    }

    /// Kahn's algorithm over `nodes`, counting only edges inside the set.
    /// Nodes on a cycle are left out.
    fn topological_sort(&self, nodes: &[NodeId]) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().collect();
        let mut in_degree: HashMap<&NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        for node_id in nodes {
            if let Some(node) = self.nodes.get(node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        while let Some(node_id) = queue.pop_front() {
            result.push(node_id.clone());

            if let Some(node) = self.nodes.get(node_id) {
                for dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            if let Some((key, _)) = in_degree.get_key_value(dependent_id) {
                                queue.push_back(*key);
                            }
                        }
                    }
                }
            }
        }

        result
    }

    /// Every node cached by `scope`.
    pub fn nodes_in_scope(&self, scope: ScopeId) -> Vec<NodeId> {
        self.nodes
            .keys()
            .filter(|node_id| node_id.scope() == scope)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::AtomKey;

    struct Marker;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        let scope = ScopeId::new();
        names
            .iter()
            .map(|name| NodeId::new(scope, AtomKey::named::<Marker>(*name)))
            .collect()
    }

    #[test]
    fn add_and_remove_edges() {
        let mut graph = DependencyGraph::new();
        let n = ids(&["source", "derived"]);

        graph.add_edge(n[0].clone(), n[1].clone());
        assert!(graph.get_node(&n[0]).unwrap().dependents().contains(&n[1]));
        assert!(graph.get_node(&n[1]).unwrap().dependencies().contains(&n[0]));
        assert!(graph.has_dependents(&n[0]));

        graph.remove_edge(&n[0], &n[1]);
        assert!(!graph.has_dependents(&n[0]));
        assert!(graph.get_node(&n[1]).unwrap().dependencies().is_empty());
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn remove_node_unlinks_neighbours() {
        let mut graph = DependencyGraph::new();
        let n = ids(&["a", "b", "c"]);
        graph.add_edge(n[0].clone(), n[1].clone());
        graph.add_edge(n[1].clone(), n[2].clone());

        let removed = graph.remove_node(&n[1]).unwrap();
        assert!(removed.dependencies().contains(&n[0]));
        assert!(!graph.has_dependents(&n[0]));
        assert!(graph.get_node(&n[2]).unwrap().dependencies().is_empty());
        assert!(!graph.contains(&n[1]));
    }

    #[test]
    fn replace_dependencies_reports_dropped_edges() {
        let mut graph = DependencyGraph::new();
        let n = ids(&["a", "b", "c", "derived"]);
        graph.replace_dependencies(&n[3], [n[0].clone(), n[1].clone()]);

        let dropped = graph.replace_dependencies(&n[3], [n[1].clone(), n[2].clone()]);
        assert_eq!(dropped, vec![n[0].clone()]);
        assert!(!graph.has_dependents(&n[0]));
        assert!(graph.has_dependents(&n[1]));
        assert!(graph.has_dependents(&n[2]));
    }

    #[test]
    fn mark_changed_propagates_in_dependency_order() {
        let mut graph = DependencyGraph::new();
        // a -> b -> c, a -> c
        let n = ids(&["a", "b", "c"]);
        graph.add_edge(n[0].clone(), n[1].clone());
        graph.add_edge(n[1].clone(), n[2].clone());
        graph.add_edge(n[0].clone(), n[2].clone());

        let plan = graph.mark_changed(&n[0]);
        assert_eq!(plan.order, vec![n[1].clone(), n[2].clone()]);
        assert!(plan.cyclic.is_empty());
    }

    #[test]
    fn diamond_visits_each_node_once() {
        let mut graph = DependencyGraph::new();
        let n = ids(&["top", "left", "right", "bottom"]);
        graph.add_edge(n[0].clone(), n[1].clone());
        graph.add_edge(n[0].clone(), n[2].clone());
        graph.add_edge(n[1].clone(), n[3].clone());
        graph.add_edge(n[2].clone(), n[3].clone());

        let plan = graph.mark_changed(&n[0]);
        assert_eq!(plan.order.len(), 3);
        assert_eq!(plan.order.last(), Some(&n[3]));
    }

    #[test]
    fn cycles_terminate_and_are_reported() {
        let mut graph = DependencyGraph::new();
        let n = ids(&["a", "b", "c"]);
        graph.add_edge(n[0].clone(), n[1].clone());
        graph.add_edge(n[1].clone(), n[2].clone());
        graph.add_edge(n[2].clone(), n[1].clone());

        let plan = graph.mark_changed(&n[0]);
        assert_eq!(plan.cyclic.len(), 2);
        assert_eq!(plan.order.len(), 2);
    }

    #[test]
    fn nodes_in_scope_filters_by_scope() {
        let mut graph = DependencyGraph::new();
        let left = ids(&["a", "b"]);
        let right = ids(&["a"]);
        graph.add_edge(left[0].clone(), left[1].clone());
        graph.add_node(right[0].clone());

        assert_eq!(graph.nodes_in_scope(left[0].scope()).len(), 2);
        assert_eq!(graph.nodes_in_scope(right[0].scope()), right);
    }
}
