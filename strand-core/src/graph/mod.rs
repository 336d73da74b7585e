//! Dependency Graph
//!
//! The graph records which atoms were read while computing which, across
//! every scope of a store.
//!
//! # Overview
//!
//! - Nodes are atoms cached in a particular scope ([`NodeId`]).
//! - Edges are dependencies: if A read B, there is an edge from B to A.
//!
//! Both forward (dependencies) and reverse (dependents) edges are kept:
//! invalidation walks dependents, and releasing an unused atom walks its
//! dependencies to find what else became unused.

mod dependency;
mod node;

pub use dependency::{DependencyGraph, Invalidation};
pub use node::{GraphNode, NodeId, ScopeId};
