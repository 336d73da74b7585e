//! Atom Store
//!
//! The store caches atom values per scope, records which atoms read which,
//! and tells subscribers when something they watch changes.
//!
//! # Layout
//!
//! Every [`AtomStore`] handle points at a *layer*: the root, or a child scope
//! created with [`AtomStore::scope`]. All layers of a tree share one
//! [`DependencyGraph`] and one entry table, so edges can cross scopes: a
//! scoped atom may depend on a root atom and is invalidated with it.
//!
//! # Override resolution
//!
//! An atom read through a layer resolves, nearest layer first, to an exact
//! override, then a type-wide override, then the parent's overrides, and
//! finally the descriptor's own producer. The value is cached in the layer
//! the override was found in, or in the root when none applies.
//!
//! # Locking
//!
//! The entry table sits behind a single mutex. It is never held while a
//! producer runs or a subscriber is notified: producers run unlocked and
//! their results are installed afterwards, and notifications are collected
//! into a batch and fired once the lock is released.
//!
//! # Async producers
//!
//! Task and stream atoms are spawned on tokio. Results are queued as
//! completions tagged with the generation that produced them; the host
//! applies them with [`AtomStore::apply_completions`] (or awaits
//! [`AtomStore::settle`]). Completions from a cancelled generation are
//! dropped.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures_util::{FutureExt, StreamExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, trace, warn};

use super::context::AtomContext;
use super::key::{AtomKey, ScopeKey};
use super::node::{
    AnyValue, AsyncProducer, AsyncWork, Atom, AtomKind, FailurePhase, Producer, ProducerKind,
    RefreshableAtom, WritableAtom,
};
use super::subscriber::{Subscriber, SubscriberId, SubscriptionContainer};
use crate::config::EngineConfig;
use crate::error::{AtomError, Result, StoreError};
use crate::graph::{DependencyGraph, NodeId, ScopeId};
use crate::task::{self, TaskSlot};

/// State shared by every layer of one store tree.
pub(crate) struct StoreShared {
    state: Mutex<StoreState>,
    completions: Mutex<VecDeque<Completion>>,
    arrived: Notify,
    config: EngineConfig,
    runtime: Option<Handle>,
}

#[derive(Default)]
struct StoreState {
    graph: DependencyGraph,
    entries: IndexMap<NodeId, Entry>,
}

/// Cached state of one atom in one scope.
struct Entry {
    kind: AtomKind,
    keep_alive: bool,
    value: Option<AnyValue>,
    subscribers: IndexMap<SubscriberId, Subscriber>,
    task: TaskSlot,
    /// Phase to show when a stream ends before yielding.
    exhausted: Option<AnyValue>,
}

impl Entry {
    fn new(kind: AtomKind, keep_alive: bool) -> Self {
        Self {
            kind,
            keep_alive,
            value: None,
            subscribers: IndexMap::new(),
            task: TaskSlot::new(),
            exhausted: None,
        }
    }
}

/// A result delivered by a spawned producer.
struct Completion {
    node: NodeId,
    generation: u64,
    /// `None` marks the end of a stream.
    value: Option<AnyValue>,
    finished: bool,
}

/// Work collected under the lock and carried out after it is released.
#[derive(Default)]
struct Batch {
    subscribers: IndexMap<SubscriberId, Subscriber>,
    retired: Vec<AnyValue>,
    released: Vec<Entry>,
    cycle: Option<String>,
}

impl Batch {
    fn collect(&mut self, entry: &Entry) {
        for (id, subscriber) in &entry.subscribers {
            self.subscribers
                .entry(*id)
                .or_insert_with(|| subscriber.clone());
        }
    }

    fn retire(&mut self, value: Option<AnyValue>) {
        self.retired.extend(value);
    }

    fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Notify every collected subscriber once, then drop retired values.
    fn finish(mut self, config: &EngineConfig) {
        if let Some(path) = self.cycle.take() {
            if config.strict {
                panic!("cyclic atom dependency: {path}");
            }
            error!(%path, "dependency cycle reached while invalidating");
        }
        for subscriber in self.subscribers.values() {
            subscriber.notify();
        }
    }
}

impl StoreState {
    /// Make sure `node` has an entry and exactly `dependencies` as its
    /// dependencies. Returns the entry plus the dependencies it stopped
    /// reading.
    fn install(
        &mut self,
        node: &NodeId,
        kind: AtomKind,
        keep_alive: bool,
        dependencies: impl IntoIterator<Item = NodeId>,
    ) -> (&mut Entry, Vec<NodeId>) {
        let dropped = self.graph.replace_dependencies(node, dependencies);
        let entry = self
            .entries
            .entry(node.clone())
            .or_insert_with(|| Entry::new(kind, keep_alive));
        entry.keep_alive |= keep_alive;
        (entry, dropped)
    }

    /// Drop every cached value derived from `source`, cancelling their tasks,
    /// and collect the subscribers to notify.
    fn invalidate(&mut self, source: &NodeId, batch: &mut Batch, include_source: bool) {
        let plan = self.graph.mark_changed(source);
        if !plan.cyclic.is_empty() {
            batch.cycle = Some(
                plan.cyclic
                    .iter()
                    .map(|node| node.key().to_string())
                    .collect::<Vec<_>>()
                    .join(" -> "),
            );
        }

        if include_source {
            if let Some(entry) = self.entries.get(source) {
                batch.collect(entry);
            }
        }
        for node in &plan.order {
            if let Some(entry) = self.entries.get_mut(node) {
                entry.task.cancel();
                batch.retire(entry.value.take());
                batch.collect(entry);
            }
        }
    }

    /// Remove candidates nobody uses any more, following their dependencies.
    fn release(&mut self, candidates: impl IntoIterator<Item = NodeId>, batch: &mut Batch) {
        let mut stack: Vec<NodeId> = candidates.into_iter().collect();
        while let Some(node) = stack.pop() {
            let in_use = self
                .entries
                .get(&node)
                .is_some_and(|entry| entry.keep_alive || !entry.subscribers.is_empty())
                || self.graph.has_dependents(&node);
            if in_use {
                continue;
            }

            if let Some(entry) = self.entries.shift_remove(&node) {
                trace!(atom = %node.key(), kind = ?entry.kind, "released atom");
                batch.released.push(entry);
            }
            if let Some(mut graph_node) = self.graph.remove_node(&node) {
                stack.extend(graph_node.take_dependencies());
            }
        }
    }
}

impl StoreShared {
    fn new(config: EngineConfig, runtime: Option<Handle>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StoreState::default()),
            completions: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
            config,
            runtime,
        })
    }

    fn cached(&self, node: &NodeId) -> Option<AnyValue> {
        self.state
            .lock()
            .entries
            .get(node)
            .and_then(|entry| entry.value.clone())
    }

    pub(crate) fn unsubscribe(&self, node: &NodeId, subscriber: SubscriberId) {
        let mut batch = Batch::default();
        let removed = {
            let mut state = self.state.lock();
            let removed = state
                .entries
                .get_mut(node)
                .and_then(|entry| entry.subscribers.shift_remove(&subscriber));
            state.release([node.clone()], &mut batch);
            removed
        };
        trace!(atom = %node.key(), released = batch.released.len(), "unwatched");
        drop(removed);
    }

    fn deliver(&self, completion: Completion) {
        self.completions.lock().push_back(completion);
        self.arrived.notify_waiters();
    }

    fn has_pending_tasks(&self) -> bool {
        if !self.completions.lock().is_empty() {
            return true;
        }
        self.state
            .lock()
            .entries
            .values()
            .any(|entry| entry.task.is_running())
    }

    fn apply_completions(&self) -> usize {
        let drained: Vec<Completion> = self.completions.lock().drain(..).collect();
        let mut applied = 0;

        for completion in drained {
            let mut batch = Batch::default();
            {
                let mut state = self.state.lock();
                let Some(entry) = state.entries.get_mut(&completion.node) else {
                    trace!(atom = %completion.node.key(), "completion for a released atom");
                    continue;
                };
                if !entry.task.is_current(completion.generation) {
                    trace!(
                        atom = %completion.node.key(),
                        generation = completion.generation,
                        "dropped stale completion"
                    );
                    continue;
                }

                let changed = match completion.value {
                    Some(value) => {
                        entry.task.settle();
                        batch.retire(entry.value.replace(value));
                        true
                    }
                    None if !entry.task.is_settled() => {
                        let exhausted = entry.exhausted.clone();
                        batch.retire(std::mem::replace(&mut entry.value, exhausted));
                        true
                    }
                    None => false,
                };
                if completion.finished {
                    entry.task.finish();
                }
                if changed {
                    state.invalidate(&completion.node, &mut batch, true);
                    applied += 1;
                }
            }
            debug!(
                atom = %completion.node.key(),
                subscribers = batch.len(),
                "applied completion"
            );
            batch.finish(&self.config);
        }

        if applied > 0 {
            self.arrived.notify_waiters();
        }
        applied
    }
}

type FamilyOverride = Arc<dyn Fn(&dyn Any) -> Option<Producer> + Send + Sync>;

#[derive(Default)]
struct Overrides {
    atoms: HashMap<AtomKey, Producer>,
    families: HashMap<TypeId, FamilyOverride>,
}

/// One scope of a store tree.
struct Layer {
    id: ScopeId,
    token: Option<ScopeKey>,
    /// Strong, so a scope keeps the layers it reads through alive.
    parent: Option<Arc<Layer>>,
    shared: Arc<StoreShared>,
    overrides: Mutex<Overrides>,
    children: DashMap<ScopeKey, Weak<Layer>>,
}

impl Layer {
    fn new(
        shared: Arc<StoreShared>,
        parent: Option<&Arc<Layer>>,
        token: Option<ScopeKey>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ScopeId::new(),
            token,
            parent: parent.cloned(),
            shared,
            overrides: Mutex::new(Overrides::default()),
            children: DashMap::new(),
        })
    }

    fn override_for<A: Atom>(&self, atom: &A) -> Option<Producer> {
        let family = {
            let overrides = self.overrides.lock();
            if let Some(producer) = overrides.atoms.get(atom.key()) {
                return Some(producer.clone());
            }
            overrides.families.get(&TypeId::of::<A>()).cloned()
        }?;
        family(atom as &dyn Any)
    }
}

impl Drop for Layer {
    fn drop(&mut self) {
        let mut batch = Batch::default();
        {
            let mut state = self.shared.state.lock();
            let mut outside = Vec::new();
            for node in state.graph.nodes_in_scope(self.id) {
                if let Some(entry) = state.entries.shift_remove(&node) {
                    batch.released.push(entry);
                }
                if let Some(mut graph_node) = state.graph.remove_node(&node) {
                    outside.extend(
                        graph_node
                            .take_dependencies()
                            .into_iter()
                            .filter(|dependency| dependency.scope() != self.id),
                    );
                }
            }
            state.release(outside, &mut batch);
        }

        if let (Some(parent), Some(token)) = (self.parent.as_ref(), self.token.as_ref()) {
            parent
                .children
                .remove_if(token, |_, child| child.strong_count() == 0);
        }
        debug!(
            scope = self.id.raw(),
            released = batch.released.len(),
            "scope torn down"
        );
    }
}

/// Where an atom read through some layer lands.
struct Resolved {
    owner: AtomStore,
    node: NodeId,
    producer: Producer,
}

struct Computed {
    value: AnyValue,
    /// Generation of the spawned task, when one was spawned.
    generation: Option<u64>,
}

/// Handle to one scope of an atom store. Clones share the scope.
#[derive(Clone)]
pub struct AtomStore {
    layer: Arc<Layer>,
}

impl AtomStore {
    /// A root store with the default configuration, spawning async atoms on
    /// the ambient tokio runtime.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            layer: Layer::new(StoreShared::new(config, None), None, None),
        }
    }

    /// A root store that spawns async atoms on `runtime`.
    pub fn with_runtime(config: EngineConfig, runtime: Handle) -> Self {
        Self {
            layer: Layer::new(StoreShared::new(config, Some(runtime)), None, None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.layer.shared.config
    }

    /// Identifier of the scope this handle points at.
    pub fn scope_id(&self) -> ScopeId {
        self.layer.id
    }

    fn shared(&self) -> &Arc<StoreShared> {
        &self.layer.shared
    }

    /// The child scope for `token`, created on first use.
    ///
    /// Asking twice with an equal token while the scope is alive returns the
    /// same scope. The scope's cached atoms are released when its last
    /// handle is dropped. A scope keeps its ancestors alive, so it keeps
    /// reading through them after their own handles are gone.
    pub fn scope(&self, token: impl Into<ScopeKey>) -> AtomStore {
        let token = token.into();
        if let Some(layer) = self
            .layer
            .children
            .get(&token)
            .and_then(|child| child.upgrade())
        {
            return AtomStore { layer };
        }

        let layer = Layer::new(self.shared().clone(), Some(&self.layer), Some(token.clone()));
        self.layer.children.insert(token, Arc::downgrade(&layer));
        debug!(scope = layer.id.raw(), parent = self.layer.id.raw(), "scope created");
        AtomStore { layer }
    }

    /// Replace `atom` with `replacement` for reads through this scope and its
    /// descendants. Values already cached are not affected.
    pub fn override_atom<A: Atom>(&self, atom: &A, replacement: A) {
        debug!(atom = %atom.key(), scope = self.layer.id.raw(), "override installed");
        self.layer
            .overrides
            .lock()
            .atoms
            .insert(atom.key().clone(), replacement.producer());
    }

    /// Replace every atom of descriptor type `A` for reads through this
    /// scope and its descendants. Exact overrides take precedence.
    pub fn override_type<A, F>(&self, replacement: F)
    where
        A: Atom,
        F: Fn(&A) -> A + Send + Sync + 'static,
    {
        let family: FamilyOverride = Arc::new(move |atom: &dyn Any| {
            atom.downcast_ref::<A>()
                .map(|atom| replacement(atom).producer())
        });
        self.layer
            .overrides
            .lock()
            .families
            .insert(TypeId::of::<A>(), family);
    }

    fn resolve<A: Atom>(&self, atom: &A) -> Resolved {
        let mut current = self.layer.clone();
        let (layer, producer) = loop {
            if let Some(producer) = current.override_for(atom) {
                break (current, producer);
            }
            match current.parent.clone() {
                Some(parent) => current = parent,
                None => break (current, atom.producer()),
            }
        };
        Resolved {
            node: NodeId::new(layer.id, atom.key().clone()),
            owner: AtomStore { layer },
            producer,
        }
    }

    /// Read an atom's value, computing it if nothing is cached.
    ///
    /// # Panics
    ///
    /// Panics if computing the atom reads the atom back.
    pub fn read<A: Atom>(&self, atom: &A) -> A::Value {
        self.try_read(atom).unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn try_read<A: Atom>(&self, atom: &A) -> Result<A::Value> {
        self.read_from(atom, None, false)
    }

    pub(crate) fn read_from<A: Atom>(
        &self,
        atom: &A,
        parent: Option<&AtomContext<'_>>,
        track: bool,
    ) -> Result<A::Value> {
        let Resolved {
            owner,
            node,
            producer,
        } = self.resolve(atom);

        if let Some(ctx) = parent {
            if ctx.is_computing(&node) {
                let path = ctx.cycle_path(&node);
                error!(%path, "cyclic atom read");
                return Err(StoreError::Cycle { path });
            }
            if track {
                ctx.track(node.clone());
            }
        }
        owner.value_of(atom, &node, producer, parent)
    }

    fn value_of<A: Atom>(
        &self,
        atom: &A,
        node: &NodeId,
        producer: Producer,
        parent: Option<&AtomContext<'_>>,
    ) -> Result<A::Value> {
        let value = match self.shared().cached(node) {
            Some(value) => value,
            None => self.compute(atom, node, producer, parent).value,
        };
        downcast::<A>(&value, node)
    }

    fn compute<A: Atom>(
        &self,
        atom: &A,
        node: &NodeId,
        producer: Producer,
        parent: Option<&AtomContext<'_>>,
    ) -> Computed {
        match producer.0 {
            ProducerKind::Sync(compute) => {
                let ctx = AtomContext::enter(self, node.clone(), parent);
                let value = compute(&ctx);
                let dependencies = ctx.into_dependencies();

                let mut batch = Batch::default();
                {
                    let mut state = self.shared().state.lock();
                    let (entry, dropped) =
                        state.install(node, atom.kind(), atom.keeps_alive(), dependencies);
                    batch.retire(entry.value.replace(value.clone()));
                    state.release(dropped, &mut batch);
                }
                trace!(atom = %node.key(), "computed");
                Computed {
                    value,
                    generation: None,
                }
            }
            ProducerKind::Async(producer) => self.start(atom, node, producer, parent),
        }
    }

    /// Begin a new generation of an async atom, cancelling the previous one.
    fn start<A: Atom>(
        &self,
        atom: &A,
        node: &NodeId,
        producer: AsyncProducer,
        parent: Option<&AtomContext<'_>>,
    ) -> Computed {
        let ctx = AtomContext::enter(self, node.clone(), parent);
        let work = (producer.start)(&ctx);
        let dependencies = ctx.into_dependencies();

        let shared = self.shared();
        let mut batch = Batch::default();
        let computed = {
            let mut state = shared.state.lock();
            let (entry, dropped) =
                state.install(node, atom.kind(), atom.keeps_alive(), dependencies);
            entry.exhausted = Some(producer.exhausted.clone());
            let generation = entry.task.begin();

            let future = drive(
                Arc::downgrade(shared),
                node.clone(),
                generation,
                work,
                producer.failed.clone(),
            );
            let computed = match task::spawn(shared.runtime.as_ref(), future) {
                Some(handle) => {
                    entry.task.attach(handle);
                    trace!(atom = %node.key(), generation, "spawned");
                    Computed {
                        value: producer.running.clone(),
                        generation: Some(generation),
                    }
                }
                None => {
                    warn!(atom = %node.key(), "no tokio runtime reachable; atom stays pending");
                    Computed {
                        value: producer.pending.clone(),
                        generation: None,
                    }
                }
            };
            batch.retire(entry.value.replace(computed.value.clone()));
            state.release(dropped, &mut batch);
            computed
        };
        drop(batch);
        computed
    }

    /// The cached value, without computing.
    pub fn peek<A: Atom>(&self, atom: &A) -> Option<A::Value> {
        let Resolved { owner, node, .. } = self.resolve(atom);
        owner
            .shared()
            .cached(&node)
            .and_then(|value| value.downcast_ref::<A::Value>().cloned())
    }

    /// Whether the atom has an entry in the scope it resolves to.
    pub fn contains<A: Atom>(&self, atom: &A) -> bool {
        let Resolved { owner, node, .. } = self.resolve(atom);
        let contains = owner.shared().state.lock().entries.contains_key(&node);
        contains
    }

    /// Number of subscribers registered on the atom.
    pub fn subscriber_count<A: Atom>(&self, atom: &A) -> usize {
        let Resolved { owner, node, .. } = self.resolve(atom);
        let count = owner
            .shared()
            .state
            .lock()
            .entries
            .get(&node)
            .map_or(0, |entry| entry.subscribers.len());
        count
    }

    /// Number of cached atoms across every scope of this store.
    pub fn atom_count(&self) -> usize {
        self.shared().state.lock().entries.len()
    }

    /// Read an atom and subscribe `container` to its changes.
    pub fn watch<A: Atom>(&self, atom: &A, container: &SubscriptionContainer) -> A::Value {
        let Resolved {
            owner,
            node,
            producer,
        } = self.resolve(atom);
        let value = owner
            .value_of(atom, &node, producer, None)
            .unwrap_or_else(|err| panic!("{err}"));

        if !container.is_closed() {
            let shared = owner.shared();
            if let Some(entry) = shared.state.lock().entries.get_mut(&node) {
                entry
                    .subscribers
                    .entry(container.id())
                    .or_insert_with(|| container.subscriber().clone());
            }
            container.record(node, Arc::downgrade(shared));
        }
        value
    }

    /// Remove `container`'s subscription to the atom. The atom is released
    /// when nothing uses it any more.
    pub fn unwatch<A: Atom>(&self, atom: &A, container: &SubscriptionContainer) {
        let Resolved { owner, node, .. } = self.resolve(atom);
        container.forget(&node);
        owner.shared().unsubscribe(&node, container.id());
    }

    /// Assign a value, invalidating everything derived from the atom.
    pub fn set<A: WritableAtom>(&self, atom: &A, value: A::Value) {
        let Resolved { owner, node, .. } = self.resolve(atom);
        let shared = owner.shared();
        let mut batch = Batch::default();
        {
            let mut state = shared.state.lock();
            let (entry, dropped) =
                state.install(&node, atom.kind(), atom.keeps_alive(), std::iter::empty());
            entry.task.cancel();
            batch.retire(entry.value.replace(Arc::new(value)));
            state.invalidate(&node, &mut batch, true);
            state.release(dropped, &mut batch);
        }
        debug!(atom = %node.key(), subscribers = batch.len(), "set");
        batch.finish(&shared.config);
    }

    /// Read, mutate in place, and write back.
    pub fn modify<A: WritableAtom>(&self, atom: &A, f: impl FnOnce(&mut A::Value)) {
        let mut value = self.read(atom);
        f(&mut value);
        self.set(atom, value);
    }

    /// Drop the cached value so the next read recomputes it. Subscriptions
    /// are kept.
    pub fn reset<A: Atom>(&self, atom: &A) {
        let Resolved { owner, node, .. } = self.resolve(atom);
        let shared = owner.shared();
        let mut batch = Batch::default();
        {
            let mut state = shared.state.lock();
            let Some(entry) = state.entries.get_mut(&node) else {
                return;
            };
            entry.task.cancel();
            batch.retire(entry.value.take());
            state.invalidate(&node, &mut batch, true);
        }
        debug!(atom = %node.key(), subscribers = batch.len(), "reset");
        batch.finish(&shared.config);
    }

    /// Restart an async atom and wait for its first result.
    ///
    /// Subscribers see the atom go back to `Running` right away. If the
    /// atom is cancelled or restarted while waiting, the value current at
    /// that point is returned.
    ///
    /// # Panics
    ///
    /// Panics if the producer reads the atom back.
    pub async fn refresh<A: RefreshableAtom>(&self, atom: &A) -> A::Value {
        let Resolved {
            owner,
            node,
            producer,
        } = self.resolve(atom);
        let computed = owner.compute(atom, &node, producer, None);

        let shared = owner.shared().clone();
        let mut batch = Batch::default();
        shared.state.lock().invalidate(&node, &mut batch, true);
        debug!(atom = %node.key(), subscribers = batch.len(), "refresh started");
        batch.finish(&shared.config);

        if computed.generation.is_none() {
            return downcast::<A>(&computed.value, &node).unwrap_or_else(|err| panic!("{err}"));
        }

        loop {
            let arrived = shared.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            shared.apply_completions();
            let current = {
                let state = shared.state.lock();
                match state.entries.get(&node) {
                    Some(entry) if entry.task.is_running() && !entry.task.is_settled() => None,
                    Some(entry) => Some(entry.value.clone()),
                    None => Some(None),
                }
            };
            match current {
                None => arrived.await,
                Some(Some(value)) => {
                    return downcast::<A>(&value, &node).unwrap_or_else(|err| panic!("{err}"))
                }
                Some(None) => return owner.read(atom),
            }
        }
    }

    /// Install every queued async result. Returns how many changed a value.
    pub fn apply_completions(&self) -> usize {
        self.shared().apply_completions()
    }

    /// Wait until at least one async result is queued.
    pub async fn wait_for_completion(&self) {
        let shared = self.shared();
        let arrived = shared.arrived.notified();
        tokio::pin!(arrived);
        arrived.as_mut().enable();
        if !shared.completions.lock().is_empty() {
            return;
        }
        arrived.await;
    }

    /// Apply completions until no async atom is running.
    ///
    /// Never returns while a stream atom that does not end is watched.
    pub async fn settle(&self) {
        let shared = self.shared();
        loop {
            let arrived = shared.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            shared.apply_completions();
            if !shared.has_pending_tasks() {
                return;
            }
            arrived.await;
        }
    }

    /// Whether any async atom is running or has undelivered results.
    pub fn has_pending_tasks(&self) -> bool {
        self.shared().has_pending_tasks()
    }
}

impl Default for AtomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AtomStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomStore")
            .field("scope", &self.layer.id)
            .field("token", &self.layer.token)
            .field("atoms", &self.atom_count())
            .finish()
    }
}

fn downcast<A: Atom>(value: &AnyValue, node: &NodeId) -> Result<A::Value> {
    value
        .downcast_ref::<A::Value>()
        .cloned()
        .ok_or_else(|| StoreError::TypeMismatch {
            key: node.key().to_string(),
        })
}

/// Run one generation of an async producer, queueing each result.
///
/// A panicking producer is reported as a failure phase so the generation
/// still settles.
async fn drive(
    shared: Weak<StoreShared>,
    node: NodeId,
    generation: u64,
    work: AsyncWork,
    failed: FailurePhase,
) {
    let deliver = |completion: Completion| {
        if let Some(shared) = shared.upgrade() {
            shared.deliver(completion);
        }
    };
    let recover = |payload: Box<dyn Any + Send>| {
        let message = panic_message(payload.as_ref());
        warn!(atom = %node.key(), generation, %message, "async producer panicked");
        failed(AtomError::failed(format!("panicked: {message}")))
    };

    match work {
        AsyncWork::Once(future) => {
            let value = AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .unwrap_or_else(recover);
            deliver(Completion {
                node: node.clone(),
                generation,
                value: Some(value),
                finished: true,
            });
        }
        AsyncWork::Continuous(stream) => {
            let mut stream = AssertUnwindSafe(stream).catch_unwind();
            while let Some(item) = stream.next().await {
                deliver(Completion {
                    node: node.clone(),
                    generation,
                    value: Some(item.unwrap_or_else(&recover)),
                    finished: false,
                });
            }
            deliver(Completion {
                node: node.clone(),
                generation,
                value: None,
                finished: true,
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::{Phase, StateAtom, StreamAtom, TaskAtom, ValueAtom};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Poll;
    use std::time::Duration;

    fn counting(calls: &Arc<AtomicUsize>) -> impl Fn() + Send + Sync + 'static {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn reads_are_cached() {
        let store = AtomStore::with_config(EngineConfig::strict());
        let computed = Arc::new(AtomicUsize::new(0));
        let counter = computed.clone();
        let atom = ValueAtom::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            7
        });

        assert_eq!(store.read(&atom), 7);
        assert_eq!(store.read(&atom), 7);
        assert_eq!(computed.load(Ordering::SeqCst), 1);
        assert!(store.contains(&atom));
        assert_eq!(store.peek(&atom), Some(7));
    }

    #[test]
    fn set_replaces_value_and_clears_dependencies() {
        let store = AtomStore::new();
        let base = StateAtom::new(|_| 2);
        let source = base.clone();
        let seeded = StateAtom::new(move |ctx| ctx.read(&source) * 10);

        assert_eq!(store.read(&seeded), 20);
        store.set(&seeded, 1);
        store.set(&base, 3);
        assert_eq!(store.read(&seeded), 1);
    }

    #[test]
    fn modify_and_reset() {
        let store = AtomStore::new();
        let list = StateAtom::new(|_| vec![1]);

        store.modify(&list, |items| items.push(2));
        assert_eq!(store.read(&list), vec![1, 2]);

        store.reset(&list);
        assert_eq!(store.peek(&list), None);
        assert_eq!(store.read(&list), vec![1]);
    }

    #[test]
    fn subscribers_are_notified_once_per_change() {
        let store = AtomStore::new();
        let base = StateAtom::new(|_| 1);
        let left_source = base.clone();
        let right_source = base.clone();
        let left = ValueAtom::new(move |ctx| ctx.read(&left_source) + 1);
        let right = ValueAtom::new(move |ctx| ctx.read(&right_source) + 2);

        let calls = Arc::new(AtomicUsize::new(0));
        let container = SubscriptionContainer::new(counting(&calls));
        store.watch(&left, &container);
        store.watch(&right, &container);
        store.watch(&base, &container);

        store.set(&base, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.read(&left), 6);
        assert_eq!(store.read(&right), 7);
    }

    #[test]
    fn unwatch_releases_unused_atoms() {
        let store = AtomStore::new();
        let base = StateAtom::new(|_| 1);
        let source = base.clone();
        let derived = ValueAtom::new(move |ctx| ctx.read(&source) * 2);
        let container = SubscriptionContainer::new(|| {});

        assert_eq!(store.watch(&derived, &container), 2);
        assert_eq!(store.atom_count(), 2);
        assert_eq!(store.subscriber_count(&derived), 1);

        store.unwatch(&derived, &container);
        assert_eq!(store.atom_count(), 0);
        assert_eq!(container.watched_count(), 0);
    }

    #[test]
    fn keep_alive_survives_unwatch() {
        let store = AtomStore::new();
        let atom = StateAtom::new(|_| 1).keep_alive();
        let container = SubscriptionContainer::new(|| {});

        store.watch(&atom, &container);
        store.set(&atom, 9);
        container.unwatch_all();
        assert_eq!(store.peek(&atom), Some(9));
    }

    #[test]
    fn dropping_a_container_unwatches() {
        let store = AtomStore::new();
        let atom = StateAtom::new(|_| 1);
        {
            let container = SubscriptionContainer::new(|| {});
            store.watch(&atom, &container);
            assert_eq!(store.subscriber_count(&atom), 1);
        }
        assert!(!store.contains(&atom));
    }

    #[test]
    fn scopes_are_reused_per_token() {
        let store = AtomStore::new();
        let first = store.scope("left");
        let again = store.scope("left");
        let other = store.scope("right");
        assert_eq!(first.scope_id(), again.scope_id());
        assert_ne!(first.scope_id(), other.scope_id());
    }

    #[test]
    fn exact_override_beats_type_override() {
        let store = AtomStore::new();
        let scope = store.scope("test");
        let a = StateAtom::new(|_| 1).named("a");
        let b = StateAtom::new(|_| 2).named("b");

        scope.override_atom(&a, StateAtom::new(|_| 100));
        scope.override_type::<StateAtom<i32>, _>(|_| StateAtom::new(|_| 50));

        assert_eq!(scope.read(&a), 100);
        assert_eq!(scope.read(&b), 50);
        assert_eq!(store.read(&a), 1);
        assert_eq!(store.read(&b), 2);
    }

    #[test]
    fn dropping_a_scope_releases_its_atoms() {
        let store = AtomStore::new();
        let atom = StateAtom::new(|_| 1);
        {
            let scope = store.scope("temporary");
            scope.override_atom(&atom, StateAtom::new(|_| 2));
            assert_eq!(scope.read(&atom), 2);
            assert_eq!(store.atom_count(), 1);
        }
        assert_eq!(store.atom_count(), 0);
        assert_eq!(store.read(&atom), 1);
    }

    #[test]
    fn scopes_outlive_the_root_handle() {
        let root = AtomStore::new();
        let theme = StateAtom::new(|_| "light");
        root.set(&theme, "dark");

        let scope = root.scope("child");
        let root_id = root.scope_id();
        drop(root);

        assert_eq!(scope.read(&theme), "dark");
        assert_eq!(scope.resolve(&theme).owner.scope_id(), root_id);
    }

    #[test]
    fn self_reads_are_cycles() {
        let store = AtomStore::new();
        let atom = ValueAtom::new(|ctx| {
            let this = ValueAtom::<i32>::new(|_| 0).named("self");
            ctx.try_read(&this).map_or(-1, |value| value + 1)
        })
        .named("self");

        assert_eq!(store.read(&atom), -1);
    }

    #[test]
    #[should_panic(expected = "cyclic atom dependency")]
    fn cyclic_reads_panic_even_when_lenient() {
        let store = AtomStore::with_config(EngineConfig::lenient());
        let atom = ValueAtom::new(|ctx| {
            let this = ValueAtom::<i32>::new(|_| 0).named("loop");
            ctx.read(&this)
        })
        .named("loop");

        store.read(&atom);
    }

    #[test]
    fn async_atoms_without_runtime_stay_pending() {
        let store = AtomStore::new();
        let task = TaskAtom::new(|_| async { 1 });
        assert_eq!(store.read(&task), Phase::Pending);
        assert!(!store.has_pending_tasks());
    }

    #[tokio::test]
    async fn task_runs_then_succeeds() {
        let store = AtomStore::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = TaskAtom::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { 42 }
        });

        assert_eq!(store.read(&task), Phase::Running);
        store.settle().await;
        assert_eq!(store.read(&task), Phase::Success(42));

        assert_eq!(store.refresh(&task).await, Phase::Success(42));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidation_cancels_running_tasks() {
        let store = AtomStore::new();
        let input = StateAtom::new(|_| 1);
        let source = input.clone();
        let doubled = TaskAtom::new(move |ctx| {
            let value = ctx.read(&source);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                value * 2
            }
        });

        assert_eq!(store.read(&doubled), Phase::Running);
        store.set(&input, 5);
        assert_eq!(store.peek(&doubled), None);

        assert_eq!(store.read(&doubled), Phase::Running);
        store.settle().await;
        assert_eq!(store.read(&doubled), Phase::Success(10));
    }

    #[tokio::test]
    async fn panicking_task_settles_as_failure() {
        let store = AtomStore::new();
        let task = TaskAtom::<u32>::new(|_| async { panic!("boom") });

        assert_eq!(store.read(&task), Phase::Running);
        tokio::time::timeout(Duration::from_secs(1), store.settle())
            .await
            .expect("settle returned");

        assert_eq!(
            store.read(&task),
            Phase::Failure(AtomError::failed("panicked: boom"))
        );
        assert!(!store.has_pending_tasks());
    }

    #[tokio::test]
    async fn panicking_stream_settles_as_failure() {
        let store = AtomStore::new();
        let stream = StreamAtom::new(|_| {
            futures_util::stream::poll_fn(|_| -> Poll<Option<u32>> { panic!("broken stream") })
        });

        store.read(&stream);
        tokio::time::timeout(Duration::from_secs(1), store.settle())
            .await
            .expect("settle returned");

        assert_eq!(
            store.read(&stream).error(),
            Some(&AtomError::failed("panicked: broken stream"))
        );
    }

    #[tokio::test]
    async fn refreshing_a_panicking_task_returns() {
        let store = AtomStore::new();
        let task = TaskAtom::<u32>::new(|_| async { panic!("again") });

        let phase = tokio::time::timeout(Duration::from_secs(1), store.refresh(&task))
            .await
            .expect("refresh returned");
        assert!(phase.error().is_some());
    }
}
