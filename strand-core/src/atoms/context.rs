//! Atom Context
//!
//! The context handed to an atom's producer while it computes. Reads made
//! through it are recorded as dependencies of the atom being computed.
//!
//! # Implementation
//!
//! Nested computations form a chain of contexts linked through `parent`,
//! living on the call stack. Reading an atom that already appears in the
//! chain is a cycle and fails with [`StoreError::Cycle`](crate::StoreError)
//! instead of recursing.

use std::cell::RefCell;

use smallvec::SmallVec;

use super::node::Atom;
use super::store::AtomStore;
use crate::error::Result;
use crate::graph::NodeId;

/// Read access for a computing atom.
pub struct AtomContext<'a> {
    store: &'a AtomStore,
    node: NodeId,
    parent: Option<&'a AtomContext<'a>>,
    dependencies: RefCell<SmallVec<[NodeId; 4]>>,
}

impl<'a> AtomContext<'a> {
    pub(crate) fn enter(
        store: &'a AtomStore,
        node: NodeId,
        parent: Option<&'a AtomContext<'a>>,
    ) -> Self {
        Self {
            store,
            node,
            parent,
            dependencies: RefCell::new(SmallVec::new()),
        }
    }

    /// Read `atom` and depend on it.
    ///
    /// # Panics
    ///
    /// Panics if the read closes a dependency cycle. Use
    /// [`try_read`](Self::try_read) to handle that case.
    pub fn read<A: Atom>(&self, atom: &A) -> A::Value {
        self.try_read(atom).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Read `atom` and depend on it, reporting cycles as errors.
    pub fn try_read<A: Atom>(&self, atom: &A) -> Result<A::Value> {
        self.store.read_from(atom, Some(self), true)
    }

    /// Read `atom` without depending on it.
    pub fn read_untracked<A: Atom>(&self, atom: &A) -> A::Value {
        self.store
            .read_from(atom, Some(self), false)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// The atom being computed.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Whether `node` is being computed anywhere up this chain.
    pub(crate) fn is_computing(&self, node: &NodeId) -> bool {
        self.chain().any(|ctx| &ctx.node == node)
    }

    /// Render the chain from the first occurrence of `node` down to here,
    /// closed with `node` again, e.g. `a -> b -> a`.
    pub(crate) fn cycle_path(&self, node: &NodeId) -> String {
        let mut frames: Vec<&NodeId> = Vec::new();
        for ctx in self.chain() {
            frames.push(&ctx.node);
            if &ctx.node == node {
                break;
            }
        }
        frames.reverse();
        frames.push(node);
        frames
            .iter()
            .map(|node| node.key().to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub(crate) fn track(&self, node: NodeId) {
        let mut dependencies = self.dependencies.borrow_mut();
        if !dependencies.contains(&node) {
            dependencies.push(node);
        }
    }

    pub(crate) fn into_dependencies(self) -> SmallVec<[NodeId; 4]> {
        self.dependencies.into_inner()
    }

    fn chain(&self) -> impl Iterator<Item = &AtomContext<'a>> {
        std::iter::successors(Some(self), |ctx| ctx.parent)
    }
}
