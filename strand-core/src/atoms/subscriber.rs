//! Subscriber types for the atom store.
//!
//! A [`Subscriber`] is a notification callback registered on atoms. Views
//! keep one inside a [`SubscriptionContainer`], which remembers every atom it
//! watches so all of them can be released together.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::store::StoreShared;
use crate::graph::NodeId;

/// Unique identifier for a subscriber.
///
/// Registrations on an atom are keyed by this ID, so watching the same atom
/// twice from one subscriber is a single registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A change callback registered on atoms.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl Subscriber {
    /// Create a new subscriber with the given notification callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: SubscriberId::new(),
            notify: Arc::new(notify),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Notify the subscriber that a watched atom changed.
    pub fn notify(&self) {
        (self.notify)();
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

/// A subscriber plus the set of atoms it currently watches.
///
/// Dropping the last clone unwatches everything.
#[derive(Clone)]
pub struct SubscriptionContainer {
    inner: Arc<ContainerInner>,
}

struct ContainerInner {
    subscriber: Subscriber,
    watched: Mutex<IndexMap<NodeId, Weak<StoreShared>>>,
    closed: AtomicBool,
}

impl SubscriptionContainer {
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ContainerInner {
                subscriber: Subscriber::new(notify),
                watched: Mutex::new(IndexMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.subscriber.id()
    }

    pub(crate) fn subscriber(&self) -> &Subscriber {
        &self.inner.subscriber
    }

    /// Number of atoms currently watched.
    pub fn watched_count(&self) -> usize {
        self.inner.watched.lock().len()
    }

    /// Whether [`unwatch_all`](Self::unwatch_all) has run. A closed container
    /// can still read through `watch` but registers nothing.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn record(&self, node: NodeId, store: Weak<StoreShared>) {
        self.inner.watched.lock().insert(node, store);
    }

    pub(crate) fn forget(&self, node: &NodeId) {
        self.inner.watched.lock().shift_remove(node);
    }

    /// Remove this subscriber from every watched atom and close the
    /// container.
    pub fn unwatch_all(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.release();
    }
}

impl ContainerInner {
    fn release(&self) {
        let watched = std::mem::take(&mut *self.watched.lock());
        for (node, store) in watched {
            if let Some(store) = store.upgrade() {
                store.unsubscribe(&node, self.subscriber.id());
            }
        }
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SubscriptionContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionContainer")
            .field("id", &self.id())
            .field("watched", &self.watched_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn subscriber_notify_calls_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscriber = Subscriber::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscriber.notify();
        subscriber.clone().notify();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn container_clones_share_identity() {
        let container = SubscriptionContainer::new(|| {});
        let clone = container.clone();
        assert_eq!(container.id(), clone.id());
        assert!(!clone.is_closed());

        container.unwatch_all();
        assert!(clone.is_closed());
        assert_eq!(clone.watched_count(), 0);
    }
}
