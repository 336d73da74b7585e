//! Hook Engine
//!
//! A [`HookDispatcher`] gives a host node persistent, position-addressed
//! state across passes of its render body.
//!
//! # Example
//!
//! ```rust
//! use strand_core::config::EngineConfig;
//! use strand_core::hooks::{EnvironmentValues, HookDispatcher};
//!
//! let mut dispatcher = HookDispatcher::new(|| println!("render again"));
//! let env = EnvironmentValues::new(EngineConfig::strict());
//!
//! let count = dispatcher.scoped(env.clone(), |scope| scope.use_state(|| 0));
//! count.set(1);
//!
//! let count = dispatcher.scoped(env, |scope| scope.use_state(|| 0));
//! assert_eq!(count.get(), 1);
//! ```

mod atom_hooks;
mod builtin;
mod coordinator;
mod dispatcher;
mod environment;
mod records;
mod strategy;

pub use atom_hooks::{
    AtomRefresher, AtomResetter, AtomSetter, UseAtomRefresher, UseAtomReset, UseAtomState,
    UseAtomValue, WatchState,
};
pub use builtin::{
    AsyncState, Cleanup, EffectHook, EffectState, RefHandle, ReducerHandle, StateHandle, UseAsync,
    UseContext, UseEffect, UseLayoutEffect, UseMemo, UseReducer, UseRef, UseState,
};
pub use coordinator::{HookCoordinator, RenderCallback, ViewUpdater};
pub use dispatcher::{Hook, HookDispatcher, HookScope};
pub use environment::EnvironmentValues;
pub use records::RecordList;
pub use strategy::{Dependency, UpdateStrategy};
