//! Error types shared by the hook engine and the atom store.
//!
//! Three families live here:
//!
//! - [`AtomError`] is an *expected* failure of an async producer. It is
//!   captured into [`Phase::Failure`](crate::atoms::Phase::Failure) and never
//!   propagated as a crash.
//! - [`StoreError`] covers programmer errors surfaced by the store, such as
//!   cyclic dependencies.
//! - [`Violation`] describes a broken reconciliation rule inside a pass. It
//!   is routed through [`EngineConfig::report`](crate::config::EngineConfig::report).

use std::sync::Arc;

use thiserror::Error;

/// Result alias for fallible store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure produced by an asynchronous atom or hook producer.
///
/// Cheap to clone so it can sit inside a cached [`Phase`](crate::atoms::Phase).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AtomError {
    #[error("producer failed: {0}")]
    Failed(Arc<str>),

    #[error("producer stream ended without a value")]
    Exhausted,
}

impl AtomError {
    /// Build a failure from any displayable error.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(Arc::from(message.to_string()))
    }
}

/// Errors raised by the atom store itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An atom's producer read the atom back, directly or transitively.
    #[error("cyclic atom dependency: {path}")]
    Cycle { path: String },

    /// A cached value did not have the type the descriptor declares.
    #[error("atom {key} holds a value of an unexpected type")]
    TypeMismatch { key: String },
}

/// A broken reconciliation rule detected during a hook pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// The hook at `position` differs in type from the previous pass.
    #[error(
        "hook at position {position} changed type from `{previous}` to `{current}`; \
         hooks must be called in the same order on every pass"
    )]
    TypeMismatch {
        position: usize,
        previous: &'static str,
        current: &'static str,
    },

    /// Fewer hooks were called than on the previous pass.
    #[error(
        "{count} hook record(s) from the previous pass were not revisited; \
         hooks must not be called conditionally"
    )]
    LeftoverRecords { count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_messages_name_both_hook_types() {
        let violation = Violation::TypeMismatch {
            position: 2,
            previous: "UseState<i32>",
            current: "UseRef<i32>",
        };
        let message = violation.to_string();
        assert!(message.contains("position 2"));
        assert!(message.contains("UseState<i32>"));
        assert!(message.contains("UseRef<i32>"));
    }

    #[test]
    fn atom_error_from_display() {
        let err = AtomError::failed("timeout after 3s");
        assert_eq!(err, AtomError::Failed(Arc::from("timeout after 3s")));
        assert_eq!(err.to_string(), "producer failed: timeout after 3s");
    }
}
