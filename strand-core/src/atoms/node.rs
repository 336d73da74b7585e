//! Atom descriptors.
//!
//! A descriptor is a cheap, cloneable value that names an atom and knows how
//! to produce its value. It holds no state; the store caches values per
//! scope, keyed by [`AtomKey`].
//!
//! | Descriptor      | Value      | Writable | Refreshable |
//! |-----------------|------------|----------|-------------|
//! | [`StateAtom`]   | `T`        | yes      | no          |
//! | [`ValueAtom`]   | `T`        | no       | no          |
//! | [`TaskAtom`]    | `Phase<T>` | no       | yes         |
//! | [`StreamAtom`]  | `Phase<T>` | no       | yes         |

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, Stream};
use futures_util::{FutureExt, StreamExt};

use super::context::AtomContext;
use super::key::AtomKey;
use super::phase::Phase;
use crate::error::AtomError;

pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// Kind of producer behind an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomKind {
    State,
    Value,
    Task,
    Stream,
}

/// An atom descriptor.
pub trait Atom: Clone + Send + Sync + 'static {
    /// What a read returns.
    type Value: Clone + Send + Sync + 'static;

    fn key(&self) -> &AtomKey;

    fn kind(&self) -> AtomKind;

    /// Whether the cached value survives losing its last subscriber.
    fn keeps_alive(&self) -> bool {
        false
    }

    #[doc(hidden)]
    fn producer(&self) -> Producer;
}

/// Atoms whose value can be assigned with `set` and `modify`.
pub trait WritableAtom: Atom {}

/// Atoms whose producer can be restarted with `refresh`.
pub trait RefreshableAtom: Atom {}

/// Type-erased production rule of an atom.
#[doc(hidden)]
#[derive(Clone)]
pub struct Producer(pub(crate) ProducerKind);

#[derive(Clone)]
pub(crate) enum ProducerKind {
    Sync(SyncProducer),
    Async(AsyncProducer),
}

pub(crate) type SyncProducer = Arc<dyn Fn(&AtomContext<'_>) -> AnyValue + Send + Sync>;

#[derive(Clone)]
pub(crate) struct AsyncProducer {
    pub start: Arc<dyn Fn(&AtomContext<'_>) -> AsyncWork + Send + Sync>,
    /// `Phase::<T>::Running`
    pub running: AnyValue,
    /// `Phase::<T>::Pending`
    pub pending: AnyValue,
    /// Value of a stream that ended before yielding anything.
    pub exhausted: AnyValue,
    /// Builds `Phase::<T>::Failure` for a producer that panicked.
    pub failed: FailurePhase,
}

pub(crate) type FailurePhase = Arc<dyn Fn(AtomError) -> AnyValue + Send + Sync>;

pub(crate) enum AsyncWork {
    Once(BoxFuture<'static, AnyValue>),
    Continuous(BoxStream<'static, AnyValue>),
}

impl Producer {
    fn sync<T, F>(compute: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&AtomContext<'_>) -> T + Send + Sync + 'static,
    {
        Self(ProducerKind::Sync(Arc::new(move |ctx: &AtomContext<'_>| {
            Arc::new(compute(ctx)) as AnyValue
        })))
    }

    fn phased<T: Send + Sync + 'static>(
        start: impl Fn(&AtomContext<'_>) -> AsyncWork + Send + Sync + 'static,
    ) -> Self {
        Self(ProducerKind::Async(AsyncProducer {
            start: Arc::new(start),
            running: Arc::new(Phase::<T>::Running),
            pending: Arc::new(Phase::<T>::Pending),
            exhausted: Arc::new(Phase::<T>::Failure(AtomError::Exhausted)),
            failed: Arc::new(|error: AtomError| Arc::new(Phase::<T>::Failure(error)) as AnyValue),
        }))
    }
}

type Compute<T> = Arc<dyn Fn(&AtomContext<'_>) -> T + Send + Sync>;
type TaskStart<T> =
    Arc<dyn Fn(&AtomContext<'_>) -> BoxFuture<'static, Result<T, AtomError>> + Send + Sync>;
type StreamStart<T> =
    Arc<dyn Fn(&AtomContext<'_>) -> BoxStream<'static, Result<T, AtomError>> + Send + Sync>;

/// Builder methods shared by every descriptor.
macro_rules! descriptor_common {
    ($name:ident) => {
        impl<T> $name<T>
        where
            T: Clone + Send + Sync + 'static,
        {
            /// Key this descriptor by name instead of its construction site.
            pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
                self.key = AtomKey::named::<Self>(name);
                self
            }

            /// Key this descriptor by an arbitrary hashable value.
            pub fn keyed<K>(mut self, key: K) -> Self
            where
                K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
            {
                self.key = AtomKey::custom::<Self, K>(key);
                self
            }

            /// Keep the cached value after the last subscriber leaves.
            pub fn keep_alive(mut self) -> Self {
                self.keep_alive = true;
                self
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    key: self.key.clone(),
                    rule: self.rule.clone(),
                    keep_alive: self.keep_alive,
                }
            }
        }

        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                self.key == other.key
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> Hash for $name<T> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.key.hash(state);
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("key", &self.key)
                    .field("keep_alive", &self.keep_alive)
                    .finish()
            }
        }
    };
}

/// A writable value with a lazily computed default.
pub struct StateAtom<T> {
    key: AtomKey,
    rule: Compute<T>,
    keep_alive: bool,
}

impl<T> StateAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[track_caller]
    pub fn new<F>(default: F) -> Self
    where
        F: Fn(&AtomContext<'_>) -> T + Send + Sync + 'static,
    {
        Self {
            key: AtomKey::located::<Self>(Location::caller()),
            rule: Arc::new(default),
            keep_alive: false,
        }
    }
}

descriptor_common!(StateAtom);

impl<T> Atom for StateAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn key(&self) -> &AtomKey {
        &self.key
    }

    fn kind(&self) -> AtomKind {
        AtomKind::State
    }

    fn keeps_alive(&self) -> bool {
        self.keep_alive
    }

    fn producer(&self) -> Producer {
        let rule = self.rule.clone();
        Producer::sync(move |ctx| rule(ctx))
    }
}

impl<T: Clone + Send + Sync + 'static> WritableAtom for StateAtom<T> {}

/// A read-only value derived from other atoms.
pub struct ValueAtom<T> {
    key: AtomKey,
    rule: Compute<T>,
    keep_alive: bool,
}

impl<T> ValueAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[track_caller]
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&AtomContext<'_>) -> T + Send + Sync + 'static,
    {
        Self {
            key: AtomKey::located::<Self>(Location::caller()),
            rule: Arc::new(compute),
            keep_alive: false,
        }
    }
}

descriptor_common!(ValueAtom);

impl<T> Atom for ValueAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn key(&self) -> &AtomKey {
        &self.key
    }

    fn kind(&self) -> AtomKind {
        AtomKind::Value
    }

    fn keeps_alive(&self) -> bool {
        self.keep_alive
    }

    fn producer(&self) -> Producer {
        let rule = self.rule.clone();
        Producer::sync(move |ctx| rule(ctx))
    }
}

/// A one-shot asynchronous value.
///
/// The future is built synchronously from the context, so dependencies are
/// whatever the closure reads before returning it.
pub struct TaskAtom<T> {
    key: AtomKey,
    rule: TaskStart<T>,
    keep_alive: bool,
}

impl<T> TaskAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A task that cannot fail.
    #[track_caller]
    pub fn new<F, Fut>(task: F) -> Self
    where
        F: Fn(&AtomContext<'_>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            key: AtomKey::located::<Self>(Location::caller()),
            rule: Arc::new(move |ctx: &AtomContext<'_>| {
                task(ctx).map(Ok::<T, AtomError>).boxed()
            }),
            keep_alive: false,
        }
    }

    /// A task whose error becomes [`Phase::Failure`].
    #[track_caller]
    pub fn throwing<F, Fut>(task: F) -> Self
    where
        F: Fn(&AtomContext<'_>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AtomError>> + Send + 'static,
    {
        Self {
            key: AtomKey::located::<Self>(Location::caller()),
            rule: Arc::new(move |ctx: &AtomContext<'_>| task(ctx).boxed()),
            keep_alive: false,
        }
    }
}

descriptor_common!(TaskAtom);

impl<T> Atom for TaskAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = Phase<T>;

    fn key(&self) -> &AtomKey {
        &self.key
    }

    fn kind(&self) -> AtomKind {
        AtomKind::Task
    }

    fn keeps_alive(&self) -> bool {
        self.keep_alive
    }

    fn producer(&self) -> Producer {
        let rule = self.rule.clone();
        Producer::phased::<T>(move |ctx| {
            let future = rule(ctx);
            AsyncWork::Once(
                future
                    .map(|result| Arc::new(Phase::from(result)) as AnyValue)
                    .boxed(),
            )
        })
    }
}

impl<T: Clone + Send + Sync + 'static> RefreshableAtom for TaskAtom<T> {}

/// A continuous asynchronous value. Every element replaces the cached phase.
pub struct StreamAtom<T> {
    key: AtomKey,
    rule: StreamStart<T>,
    keep_alive: bool,
}

impl<T> StreamAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A stream of plain values.
    #[track_caller]
    pub fn new<F, S>(stream: F) -> Self
    where
        F: Fn(&AtomContext<'_>) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            key: AtomKey::located::<Self>(Location::caller()),
            rule: Arc::new(move |ctx: &AtomContext<'_>| {
                stream(ctx).map(Ok::<T, AtomError>).boxed()
            }),
            keep_alive: false,
        }
    }

    /// A stream whose `Err` elements become [`Phase::Failure`].
    #[track_caller]
    pub fn throwing<F, S>(stream: F) -> Self
    where
        F: Fn(&AtomContext<'_>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<T, AtomError>> + Send + 'static,
    {
        Self {
            key: AtomKey::located::<Self>(Location::caller()),
            rule: Arc::new(move |ctx: &AtomContext<'_>| stream(ctx).boxed()),
            keep_alive: false,
        }
    }
}

descriptor_common!(StreamAtom);

impl<T> Atom for StreamAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = Phase<T>;

    fn key(&self) -> &AtomKey {
        &self.key
    }

    fn kind(&self) -> AtomKind {
        AtomKind::Stream
    }

    fn keeps_alive(&self) -> bool {
        self.keep_alive
    }

    fn producer(&self) -> Producer {
        let rule = self.rule.clone();
        Producer::phased::<T>(move |ctx| {
            let stream = rule(ctx);
            AsyncWork::Continuous(
                stream
                    .map(|item| Arc::new(Phase::from(item)) as AnyValue)
                    .boxed(),
            )
        })
    }
}

impl<T: Clone + Send + Sync + 'static> RefreshableAtom for StreamAtom<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_site_is_the_default_key() {
        let first = StateAtom::new(|_| 0_i32);
        let second = StateAtom::new(|_| 0_i32);
        assert_ne!(first.key(), second.key());
        assert_eq!(first.clone(), first);
    }

    #[test]
    fn named_descriptors_share_identity() {
        let a = StateAtom::new(|_| 1_i32).named("count");
        let b = StateAtom::new(|_| 2_i32).named("count");
        assert_eq!(a.key(), b.key());

        let other_type = ValueAtom::new(|_| 1_i32).named("count");
        assert_ne!(a.key(), other_type.key());
    }

    #[test]
    fn keyed_descriptors_compare_by_value() {
        let user = |id: u32| ValueAtom::new(move |_| id).keyed(("user", id));
        assert_eq!(user(1).key(), user(1).key());
        assert_ne!(user(1).key(), user(2).key());
    }

    #[test]
    fn kinds_and_keep_alive() {
        let task = TaskAtom::new(|_| async { 1_u8 }).keep_alive();
        assert_eq!(task.kind(), AtomKind::Task);
        assert!(task.keeps_alive());

        let stream = StreamAtom::new(|_| futures_util::stream::iter([1_u8]));
        assert_eq!(stream.kind(), AtomKind::Stream);
        assert!(!stream.keeps_alive());
    }

    #[test]
    fn async_producers_carry_typed_phases() {
        let task = TaskAtom::new(|_| async { 1_u8 });
        let Producer(ProducerKind::Async(producer)) = task.producer() else {
            panic!("task atoms produce asynchronously");
        };
        assert_eq!(
            producer.running.downcast_ref::<Phase<u8>>(),
            Some(&Phase::Running)
        );
        assert_eq!(
            producer.exhausted.downcast_ref::<Phase<u8>>(),
            Some(&Phase::Failure(AtomError::Exhausted))
        );
    }
}
