//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

use crate::atoms::AtomKey;

/// Unique identifier for a store scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

/// An atom as seen by the graph: the scope that caches it plus its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    scope: ScopeId,
    key: AtomKey,
}

impl NodeId {
    pub fn new(scope: ScopeId, key: AtomKey) -> Self {
        Self { scope, key }
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn key(&self) -> &AtomKey {
        &self.key
    }
}

/// Edges of one node.
///
/// Both directions are kept so invalidation can walk dependents and release
/// can walk dependencies without scanning the whole graph.
#[derive(Debug, Default)]
pub struct GraphNode {
    /// Nodes this node read while computing its value.
    dependencies: IndexSet<NodeId>,

    /// Nodes that read this node while computing theirs.
    dependents: IndexSet<NodeId>,
}

impl GraphNode {
    pub fn add_dependency(&mut self, node_id: NodeId) {
        self.dependencies.insert(node_id);
    }

    pub fn remove_dependency(&mut self, node_id: &NodeId) {
        self.dependencies.shift_remove(node_id);
    }

    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: &NodeId) {
        self.dependents.shift_remove(node_id);
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    /// Detach and return all dependencies.
    pub fn take_dependencies(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.dependencies)
    }
}
