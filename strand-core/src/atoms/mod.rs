//! Atom Store
//!
//! Atoms are named, lazily computed values. Reading one inside another
//! atom's producer records a dependency, so changing a value invalidates
//! exactly what was derived from it.
//!
//! # Example
//!
//! ```rust
//! use strand_core::atoms::{AtomStore, StateAtom, SubscriptionContainer, ValueAtom};
//!
//! let store = AtomStore::new();
//! let count = StateAtom::new(|_| 1);
//! let source = count.clone();
//! let doubled = ValueAtom::new(move |ctx| ctx.read(&source) * 2);
//!
//! let view = SubscriptionContainer::new(|| println!("doubled changed"));
//! assert_eq!(store.watch(&doubled, &view), 2);
//!
//! store.set(&count, 5);
//! assert_eq!(store.read(&doubled), 10);
//! ```

mod context;
mod key;
mod node;
mod phase;
mod store;
mod subscriber;

pub use context::AtomContext;
pub use key::{AtomKey, ScopeKey};
pub use node::{
    Atom, AtomKind, Producer, RefreshableAtom, StateAtom, StreamAtom, TaskAtom, ValueAtom,
    WritableAtom,
};
pub use phase::Phase;
pub use store::AtomStore;
pub use subscriber::{Subscriber, SubscriberId, SubscriptionContainer};
