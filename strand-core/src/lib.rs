//! Strand Core
//!
//! This crate provides the state layer for declarative UI hosts. It
//! implements:
//!
//! - A positional hook engine that keeps per-call-site state alive across
//!   repeated passes of a render body
//! - An atom store: shared, lazily computed values with automatic dependency
//!   tracking, scoping, overrides and async producers
//!
//! The host owns the render loop. The engine only asks for another pass
//! through the callback handed to [`hooks::HookDispatcher::new`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `hooks`: record list, dispatcher, built-in and atom-aware hooks
//! - `atoms`: atom descriptors, the store, subscriptions
//! - `graph`: dependency graph shared by every scope of a store
//! - `task`: single-owner handles for spawned async work
//! - `config` / `error`: engine configuration and error types
//!
//! # Example
//!
//! ```rust
//! use strand_core::atoms::{AtomStore, StateAtom, ValueAtom};
//! use strand_core::config::EngineConfig;
//! use strand_core::hooks::{EnvironmentValues, HookDispatcher};
//!
//! let store = AtomStore::new();
//! let count = StateAtom::new(|_| 0);
//! let source = count.clone();
//! let doubled = ValueAtom::new(move |ctx| ctx.read(&source) * 2);
//!
//! let mut view = HookDispatcher::new(|| println!("schedule another pass"));
//! let env = EnvironmentValues::new(EngineConfig::default()).with(store.clone());
//!
//! let shown = view.scoped(env.clone(), |scope| scope.use_atom_value(&doubled));
//! assert_eq!(shown, 0);
//!
//! // Prints "schedule another pass" once.
//! store.set(&count, 5);
//!
//! let shown = view.scoped(env, |scope| scope.use_atom_value(&doubled));
//! assert_eq!(shown, 10);
//! ```

pub mod atoms;
pub mod config;
pub mod error;
pub mod graph;
pub mod hooks;
pub mod task;

pub use atoms::{AtomStore, Phase};
pub use config::EngineConfig;
pub use error::{AtomError, Result, StoreError, Violation};
pub use hooks::{EnvironmentValues, HookDispatcher, HookScope};
