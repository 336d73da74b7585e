//! When a hook's state should be recomputed.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Update timing declared by a hook.
///
/// A hook that returns `None` from
/// [`Hook::update_strategy`](super::Hook::update_strategy) is treated as
/// changed on every pass.
#[derive(Clone)]
pub enum UpdateStrategy {
    /// Update once when the state is created, never again.
    Once,
    /// Update again only when the dependency changes.
    Preserved(Dependency),
}

impl UpdateStrategy {
    /// Preserve the state for as long as `key` compares equal.
    pub fn preserved_by<K>(key: K) -> Self
    where
        K: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        Self::Preserved(Dependency::new(key))
    }

    /// Whether moving from `previous` to `next` requires an update.
    pub fn requires_update(previous: Option<&Self>, next: Option<&Self>) -> bool {
        match (previous, next) {
            (Some(previous), Some(next)) => previous != next,
            _ => true,
        }
    }
}

impl PartialEq for UpdateStrategy {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Once, Self::Once) => true,
            (Self::Preserved(a), Self::Preserved(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => f.write_str("Once"),
            Self::Preserved(dependency) => f.debug_tuple("Preserved").field(dependency).finish(),
        }
    }
}

/// A type-erased comparison key.
///
/// Two dependencies are equal when they hold values of the same type that
/// compare equal.
#[derive(Clone)]
pub struct Dependency(Arc<dyn DependencyValue>);

impl Dependency {
    pub fn new<K>(key: K) -> Self
    where
        K: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(key))
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_dyn(other.0.as_any())
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_dyn(f)
    }
}

trait DependencyValue: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_dyn(&self, other: &dyn Any) -> bool;
    fn fmt_dyn(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<K> DependencyValue for K
where
    K: PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_dyn(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<K>().is_some_and(|other| self == other)
    }

    fn fmt_dyn(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
