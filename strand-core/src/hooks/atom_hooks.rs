//! Hooks that read and write atoms.
//!
//! The store comes from the pass environment: install an [`AtomStore`] (or
//! a scope of one) with [`EnvironmentValues::with`](super::EnvironmentValues::with).
//! Watching hooks keep one [`SubscriptionContainer`] per record whose
//! notification requests a re-render, and unwatch everything when the
//! record is disposed.

use std::fmt;

use super::coordinator::HookCoordinator;
use super::dispatcher::{Hook, HookScope};
use crate::atoms::{Atom, AtomStore, RefreshableAtom, SubscriptionContainer, WritableAtom};

fn store_of<S>(coordinator: &HookCoordinator<S>) -> AtomStore {
    match coordinator.environment().get::<AtomStore>() {
        Some(store) => store.clone(),
        None => panic!("atom hooks need an AtomStore in the pass environment"),
    }
}

/// Subscription state of a watching hook.
pub struct WatchState<A> {
    container: Option<SubscriptionContainer>,
    watching: Option<A>,
}

impl<A> Default for WatchState<A> {
    fn default() -> Self {
        Self {
            container: None,
            watching: None,
        }
    }
}

/// Read `atom` and make sure this record is subscribed to it alone.
fn watch_from<A: Atom>(coordinator: &HookCoordinator<WatchState<A>>, atom: &A) -> A::Value {
    let store = store_of(coordinator);
    let (container, previous) = {
        let mut state = coordinator.state();
        let container = state
            .container
            .get_or_insert_with(|| {
                let updater = coordinator.updater().clone();
                SubscriptionContainer::new(move || updater.request())
            })
            .clone();
        let previous = match &state.watching {
            Some(watching) if watching.key() == atom.key() => None,
            _ => state.watching.replace(atom.clone()),
        };
        (container, previous)
    };

    if let Some(previous) = previous {
        store.unwatch(&previous, &container);
    }
    store.watch(atom, &container)
}

fn release<A>(state: &mut WatchState<A>) {
    state.watching = None;
    if let Some(container) = state.container.take() {
        container.unwatch_all();
    }
}

/// Watches an atom and returns its value.
pub struct UseAtomValue<A> {
    atom: A,
}

impl<A: Atom> UseAtomValue<A> {
    pub fn new(atom: &A) -> Self {
        Self { atom: atom.clone() }
    }
}

impl<A: Atom> Hook for UseAtomValue<A> {
    type State = WatchState<A>;
    type Value = A::Value;

    fn make_state(&self) -> WatchState<A> {
        WatchState::default()
    }

    fn value(&self, coordinator: &HookCoordinator<WatchState<A>>) -> A::Value {
        watch_from(coordinator, &self.atom)
    }

    fn dispose(&self, state: &mut WatchState<A>) {
        release(state);
    }
}

/// Writes to one atom of one store.
pub struct AtomSetter<A> {
    store: AtomStore,
    atom: A,
}

impl<A: WritableAtom> AtomSetter<A> {
    pub fn set(&self, value: A::Value) {
        self.store.set(&self.atom, value);
    }

    pub fn modify(&self, f: impl FnOnce(&mut A::Value)) {
        self.store.modify(&self.atom, f);
    }
}

impl<A: Clone> Clone for AtomSetter<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            atom: self.atom.clone(),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for AtomSetter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomSetter").field("atom", &self.atom).finish()
    }
}

/// Watches a writable atom and returns its value with a setter.
pub struct UseAtomState<A> {
    atom: A,
}

impl<A: WritableAtom> UseAtomState<A> {
    pub fn new(atom: &A) -> Self {
        Self { atom: atom.clone() }
    }
}

impl<A: WritableAtom> Hook for UseAtomState<A> {
    type State = WatchState<A>;
    type Value = (A::Value, AtomSetter<A>);

    fn make_state(&self) -> WatchState<A> {
        WatchState::default()
    }

    fn value(&self, coordinator: &HookCoordinator<WatchState<A>>) -> Self::Value {
        let value = watch_from(coordinator, &self.atom);
        let setter = AtomSetter {
            store: store_of(coordinator),
            atom: self.atom.clone(),
        };
        (value, setter)
    }

    fn dispose(&self, state: &mut WatchState<A>) {
        release(state);
    }
}

/// Restarts an async atom.
pub struct AtomRefresher<A> {
    store: AtomStore,
    atom: A,
}

impl<A: RefreshableAtom> AtomRefresher<A> {
    pub async fn refresh(&self) -> A::Value {
        self.store.refresh(&self.atom).await
    }
}

impl<A: Clone> Clone for AtomRefresher<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            atom: self.atom.clone(),
        }
    }
}

/// Returns a refresher for an async atom without watching it.
pub struct UseAtomRefresher<A> {
    atom: A,
}

impl<A: RefreshableAtom> UseAtomRefresher<A> {
    pub fn new(atom: &A) -> Self {
        Self { atom: atom.clone() }
    }
}

impl<A: RefreshableAtom> Hook for UseAtomRefresher<A> {
    type State = ();
    type Value = AtomRefresher<A>;

    fn make_state(&self) {}

    fn value(&self, coordinator: &HookCoordinator<()>) -> AtomRefresher<A> {
        AtomRefresher {
            store: store_of(coordinator),
            atom: self.atom.clone(),
        }
    }
}

/// Drops an atom's cached value.
pub struct AtomResetter<A> {
    store: AtomStore,
    atom: A,
}

impl<A: Atom> AtomResetter<A> {
    pub fn reset(&self) {
        self.store.reset(&self.atom);
    }
}

impl<A: Clone> Clone for AtomResetter<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            atom: self.atom.clone(),
        }
    }
}

/// Returns a resetter for an atom without watching it.
pub struct UseAtomReset<A> {
    atom: A,
}

impl<A: Atom> UseAtomReset<A> {
    pub fn new(atom: &A) -> Self {
        Self { atom: atom.clone() }
    }
}

impl<A: Atom> Hook for UseAtomReset<A> {
    type State = ();
    type Value = AtomResetter<A>;

    fn make_state(&self) {}

    fn value(&self, coordinator: &HookCoordinator<()>) -> AtomResetter<A> {
        AtomResetter {
            store: store_of(coordinator),
            atom: self.atom.clone(),
        }
    }
}

impl HookScope<'_> {
    /// # Panics
    ///
    /// The atom hooks panic when the pass environment holds no [`AtomStore`].
    pub fn use_atom_value<A: Atom>(&mut self, atom: &A) -> A::Value {
        self.use_hook(UseAtomValue::new(atom))
    }

    pub fn use_atom_state<A: WritableAtom>(&mut self, atom: &A) -> (A::Value, AtomSetter<A>) {
        self.use_hook(UseAtomState::new(atom))
    }

    pub fn use_atom_refresher<A: RefreshableAtom>(&mut self, atom: &A) -> AtomRefresher<A> {
        self.use_hook(UseAtomRefresher::new(atom))
    }

    pub fn use_atom_reset<A: Atom>(&mut self, atom: &A) -> AtomResetter<A> {
        self.use_hook(UseAtomReset::new(atom))
    }
}
