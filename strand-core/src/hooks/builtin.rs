//! Built-in hooks.
//!
//! Each hook here is a small [`Hook`] implementation plus a convenience
//! method on [`HookScope`]:
//!
//! | Hook               | Strategy          | Re-renders on change |
//! |--------------------|-------------------|----------------------|
//! | [`UseState`]       | once              | yes                  |
//! | [`UseRef`]         | once              | no                   |
//! | [`UseReducer`]     | once              | yes                  |
//! | [`UseMemo`]        | preserved by deps | n/a                  |
//! | [`UseEffect`]      | caller's choice   | n/a (deferred)       |
//! | [`UseLayoutEffect`]| caller's choice   | n/a                  |
//! | [`UseAsync`]       | caller's choice   | yes                  |
//! | [`UseContext`]     | every pass        | n/a                  |

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;

use super::coordinator::{HookCoordinator, ViewUpdater};
use super::dispatcher::{Hook, HookScope};
use super::strategy::UpdateStrategy;
use crate::atoms::Phase;
use crate::error::AtomError;
use crate::task::{self, TaskSlot};

/// Local state of a view.
pub struct UseState<T> {
    initial: Box<dyn Fn() -> T>,
}

impl<T: Send + 'static> UseState<T> {
    pub fn new(initial: impl Fn() -> T + 'static) -> Self {
        Self {
            initial: Box::new(initial),
        }
    }
}

/// Reads and writes a [`UseState`] value. Writes request a re-render.
pub struct StateHandle<T> {
    state: Arc<Mutex<T>>,
    updater: ViewUpdater,
}

impl<T> StateHandle<T> {
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.state.lock().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn set(&self, value: T) {
        *self.state.lock() = value;
        self.updater.request();
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.state.lock());
        self.updater.request();
    }
}

impl<T> Clone for StateHandle<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            updater: self.updater.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for StateHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateHandle").field(&*self.state.lock()).finish()
    }
}

impl<T: Send + 'static> Hook for UseState<T> {
    type State = T;
    type Value = StateHandle<T>;

    fn update_strategy(&self) -> Option<UpdateStrategy> {
        Some(UpdateStrategy::Once)
    }

    fn make_state(&self) -> T {
        (self.initial)()
    }

    fn value(&self, coordinator: &HookCoordinator<T>) -> StateHandle<T> {
        StateHandle {
            state: coordinator.state_handle(),
            updater: coordinator.updater().clone(),
        }
    }
}

/// A mutable cell that survives passes without triggering re-renders.
pub struct UseRef<T> {
    initial: Box<dyn Fn() -> T>,
}

impl<T: Send + 'static> UseRef<T> {
    pub fn new(initial: impl Fn() -> T + 'static) -> Self {
        Self {
            initial: Box::new(initial),
        }
    }
}

/// Handle to a [`UseRef`] cell.
pub struct RefHandle<T> {
    cell: Arc<Mutex<T>>,
}

impl<T> RefHandle<T> {
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.cell.lock().clone()
    }

    pub fn set(&self, value: T) {
        *self.cell.lock() = value;
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.cell.lock())
    }
}

impl<T> Clone for RefHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Send + 'static> Hook for UseRef<T> {
    type State = T;
    type Value = RefHandle<T>;

    fn update_strategy(&self) -> Option<UpdateStrategy> {
        Some(UpdateStrategy::Once)
    }

    fn make_state(&self) -> T {
        (self.initial)()
    }

    fn value(&self, coordinator: &HookCoordinator<T>) -> RefHandle<T> {
        RefHandle {
            cell: coordinator.state_handle(),
        }
    }
}

type Reducer<S, A> = Arc<dyn Fn(&S, A) -> S + Send + Sync>;

/// State driven by actions through a reducer.
pub struct UseReducer<S, A> {
    initial: Box<dyn Fn() -> S>,
    reducer: Reducer<S, A>,
}

impl<S: Send + 'static, A: 'static> UseReducer<S, A> {
    pub fn new(
        initial: impl Fn() -> S + 'static,
        reducer: impl Fn(&S, A) -> S + Send + Sync + 'static,
    ) -> Self {
        Self {
            initial: Box::new(initial),
            reducer: Arc::new(reducer),
        }
    }
}

/// Current state of a [`UseReducer`] plus its dispatch function.
pub struct ReducerHandle<S, A> {
    state: Arc<Mutex<S>>,
    reducer: Reducer<S, A>,
    updater: ViewUpdater,
}

impl<S, A> ReducerHandle<S, A> {
    pub fn state(&self) -> S
    where
        S: Clone,
    {
        self.state.lock().clone()
    }

    /// Apply `action` and request a re-render.
    pub fn dispatch(&self, action: A) {
        {
            let mut state = self.state.lock();
            let next = (self.reducer)(&state, action);
            *state = next;
        }
        self.updater.request();
    }
}

impl<S, A> Clone for ReducerHandle<S, A> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: Arc::clone(&self.reducer),
            updater: self.updater.clone(),
        }
    }
}

impl<S: Send + 'static, A: 'static> Hook for UseReducer<S, A> {
    type State = S;
    type Value = ReducerHandle<S, A>;

    fn update_strategy(&self) -> Option<UpdateStrategy> {
        Some(UpdateStrategy::Once)
    }

    fn make_state(&self) -> S {
        (self.initial)()
    }

    fn value(&self, coordinator: &HookCoordinator<S>) -> ReducerHandle<S, A> {
        ReducerHandle {
            state: coordinator.state_handle(),
            reducer: Arc::clone(&self.reducer),
            updater: coordinator.updater().clone(),
        }
    }
}

/// A value recomputed only when its dependency key changes.
pub struct UseMemo<T> {
    compute: Box<dyn Fn() -> T>,
    strategy: UpdateStrategy,
}

impl<T: Clone + Send + 'static> UseMemo<T> {
    pub fn new<K>(deps: K, compute: impl Fn() -> T + 'static) -> Self
    where
        K: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            compute: Box::new(compute),
            strategy: UpdateStrategy::preserved_by(deps),
        }
    }
}

impl<T: Clone + Send + 'static> Hook for UseMemo<T> {
    type State = Option<T>;
    type Value = T;

    fn update_strategy(&self) -> Option<UpdateStrategy> {
        Some(self.strategy.clone())
    }

    fn make_state(&self) -> Option<T> {
        None
    }

    fn value(&self, coordinator: &HookCoordinator<Option<T>>) -> T {
        if let Some(value) = coordinator.state().as_ref() {
            return value.clone();
        }
        let value = (self.compute)();
        *coordinator.state() = Some(value.clone());
        value
    }

    fn update_state(&self, coordinator: &HookCoordinator<Option<T>>) {
        let value = (self.compute)();
        *coordinator.state() = Some(value);
    }
}

/// Undo function returned by an effect.
pub type Cleanup = Box<dyn FnOnce() + Send>;

type EffectFn = Box<dyn FnOnce() -> Option<Cleanup>>;

/// A side effect run when its strategy says so. The previous run's cleanup
/// runs first, and once more when the record is disposed.
///
/// `DEFERRED` effects run after the render body returns.
pub struct EffectHook<const DEFERRED: bool> {
    effect: Cell<Option<EffectFn>>,
    strategy: Option<UpdateStrategy>,
}

/// Effect run after the render body.
pub type UseEffect = EffectHook<true>;

/// Effect run inline, where it is called.
pub type UseLayoutEffect = EffectHook<false>;

impl<const DEFERRED: bool> EffectHook<DEFERRED> {
    /// Run on every pass.
    pub fn new(effect: impl FnOnce() -> Option<Cleanup> + 'static) -> Self {
        Self {
            effect: Cell::new(Some(Box::new(effect))),
            strategy: None,
        }
    }

    /// Run on the first pass only.
    pub fn once(mut self) -> Self {
        self.strategy = Some(UpdateStrategy::Once);
        self
    }

    /// Run again only when `deps` changes.
    pub fn with_deps<K>(mut self, deps: K) -> Self
    where
        K: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.strategy = Some(UpdateStrategy::preserved_by(deps));
        self
    }
}

/// Persistent state of an effect: the pending cleanup.
#[derive(Default)]
pub struct EffectState {
    cleanup: Option<Cleanup>,
}

impl<const DEFERRED: bool> Hook for EffectHook<DEFERRED> {
    type State = EffectState;
    type Value = ();

    const DEFERS_UPDATE: bool = DEFERRED;

    fn update_strategy(&self) -> Option<UpdateStrategy> {
        self.strategy.clone()
    }

    fn make_state(&self) -> EffectState {
        EffectState::default()
    }

    fn value(&self, _coordinator: &HookCoordinator<EffectState>) {}

    fn update_state(&self, coordinator: &HookCoordinator<EffectState>) {
        let Some(effect) = self.effect.take() else {
            return;
        };
        let previous = coordinator.state().cleanup.take();
        if let Some(cleanup) = previous {
            cleanup();
        }
        let cleanup = effect();
        coordinator.state().cleanup = cleanup;
    }

    fn dispose(&self, state: &mut EffectState) {
        if let Some(cleanup) = state.cleanup.take() {
            cleanup();
        }
    }
}

/// Result handed over by a finished run, tagged with its generation.
type Landed<T> = Arc<Mutex<Option<(u64, Result<T, AtomError>)>>>;

/// Persistent state of [`UseAsync`].
///
/// The spawned task never touches `phase`: it parks its result in `landed`
/// and requests a pass, and the pass installs it.
pub struct AsyncState<T> {
    phase: Phase<T>,
    task: TaskSlot,
    landed: Landed<T>,
}

/// Runs a future and exposes its progress as a [`Phase`].
///
/// Starting a new run (when the strategy asks for an update) aborts the
/// previous one; its result is never observed. The task runs on the
/// [`Handle`] found in the environment, or on the ambient runtime.
pub struct UseAsync<T> {
    future: Cell<Option<BoxFuture<'static, Result<T, AtomError>>>>,
    strategy: Option<UpdateStrategy>,
}

impl<T: Clone + Send + 'static> UseAsync<T> {
    /// Run `future` once, on the first pass.
    pub fn new(future: impl Future<Output = T> + Send + 'static) -> Self {
        Self::throwing(future.map(Ok))
    }

    /// Like [`new`](Self::new) for futures that can fail.
    pub fn throwing(future: impl Future<Output = Result<T, AtomError>> + Send + 'static) -> Self {
        Self {
            future: Cell::new(Some(future.boxed())),
            strategy: Some(UpdateStrategy::Once),
        }
    }

    /// Run again, cancelling the previous run, whenever `deps` changes.
    pub fn with_deps<K>(mut self, deps: K) -> Self
    where
        K: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.strategy = Some(UpdateStrategy::preserved_by(deps));
        self
    }
}

impl<T: Clone + Send + 'static> Hook for UseAsync<T> {
    type State = AsyncState<T>;
    type Value = Phase<T>;

    fn update_strategy(&self) -> Option<UpdateStrategy> {
        self.strategy.clone()
    }

    fn make_state(&self) -> AsyncState<T> {
        AsyncState {
            phase: Phase::Pending,
            task: TaskSlot::new(),
            landed: Arc::default(),
        }
    }

    fn value(&self, coordinator: &HookCoordinator<AsyncState<T>>) -> Phase<T> {
        let mut state = coordinator.state();
        let landed = state.landed.lock().take();
        if let Some((generation, result)) = landed {
            if state.task.is_current(generation) {
                state.phase = Phase::from(result);
                state.task.finish();
            } else {
                tracing::trace!(generation, "dropped stale async hook result");
            }
        }
        state.phase.clone()
    }

    fn update_state(&self, coordinator: &HookCoordinator<AsyncState<T>>) {
        let Some(future) = self.future.take() else {
            return;
        };
        let updater = coordinator.updater().clone();
        let runtime = coordinator.environment().get::<Handle>().cloned();

        let mut state = coordinator.state();
        let generation = state.task.begin();
        let landed = state.landed.clone();
        let run = async move {
            let result = future.await;
            {
                let mut slot = landed.lock();
                if slot.as_ref().is_some_and(|(newer, _)| *newer > generation) {
                    return;
                }
                *slot = Some((generation, result));
            }
            updater.request();
        };

        match task::spawn(runtime.as_ref(), run) {
            Some(join) => {
                state.task.attach(join);
                state.phase = Phase::Running;
                tracing::trace!(generation, "async hook started");
            }
            None => {
                tracing::warn!("no tokio runtime reachable; async hook stays pending");
                state.phase = Phase::Pending;
            }
        }
    }

    fn dispose(&self, state: &mut AsyncState<T>) {
        state.task.cancel();
        state.landed.lock().take();
    }
}

/// Reads a typed value from the pass environment.
pub struct UseContext<T> {
    marker: PhantomData<fn() -> T>,
}

impl<T> UseContext<T> {
    pub fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<T> Default for UseContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Hook for UseContext<T> {
    type State = ();
    type Value = Option<T>;

    fn make_state(&self) {}

    fn value(&self, coordinator: &HookCoordinator<()>) -> Option<T> {
        coordinator.environment().get::<T>().cloned()
    }
}

impl HookScope<'_> {
    pub fn use_state<T: Send + 'static>(
        &mut self,
        initial: impl Fn() -> T + 'static,
    ) -> StateHandle<T> {
        self.use_hook(UseState::new(initial))
    }

    pub fn use_ref<T: Send + 'static>(&mut self, initial: impl Fn() -> T + 'static) -> RefHandle<T> {
        self.use_hook(UseRef::new(initial))
    }

    pub fn use_reducer<S: Send + 'static, A: 'static>(
        &mut self,
        initial: impl Fn() -> S + 'static,
        reducer: impl Fn(&S, A) -> S + Send + Sync + 'static,
    ) -> ReducerHandle<S, A> {
        self.use_hook(UseReducer::new(initial, reducer))
    }

    pub fn use_memo<T, K>(&mut self, deps: K, compute: impl Fn() -> T + 'static) -> T
    where
        T: Clone + Send + 'static,
        K: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.use_hook(UseMemo::new(deps, compute))
    }

    /// Run `effect` after this pass whenever `deps` changes.
    pub fn use_effect<K>(&mut self, deps: K, effect: impl FnOnce() -> Option<Cleanup> + 'static)
    where
        K: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.use_hook(UseEffect::new(effect).with_deps(deps));
    }

    /// Run `effect` inline whenever `deps` changes.
    pub fn use_layout_effect<K>(
        &mut self,
        deps: K,
        effect: impl FnOnce() -> Option<Cleanup> + 'static,
    ) where
        K: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.use_hook(UseLayoutEffect::new(effect).with_deps(deps));
    }

    pub fn use_async<T, K>(
        &mut self,
        deps: K,
        future: impl Future<Output = T> + Send + 'static,
    ) -> Phase<T>
    where
        T: Clone + Send + 'static,
        K: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.use_hook(UseAsync::new(future).with_deps(deps))
    }

    pub fn use_context<T: Clone + Send + Sync + 'static>(&mut self) -> Option<T> {
        self.use_hook(UseContext::<T>::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::hooks::coordinator::RenderRequest;
    use crate::hooks::{EnvironmentValues, HookDispatcher};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn env() -> EnvironmentValues {
        EnvironmentValues::new(EngineConfig::strict())
    }

    fn counting_dispatcher() -> (HookDispatcher, Arc<AtomicUsize>) {
        let renders = Arc::new(AtomicUsize::new(0));
        let counter = renders.clone();
        let dispatcher = HookDispatcher::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (dispatcher, renders)
    }

    #[test]
    fn state_persists_and_requests_render() {
        let (mut dispatcher, renders) = counting_dispatcher();

        let handle = dispatcher.scoped(env(), |scope| scope.use_state(|| 1));
        handle.set(2);
        handle.update(|value| *value += 1);
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        let again = dispatcher.scoped(env(), |scope| scope.use_state(|| 100));
        assert_eq!(again.get(), 3);
    }

    #[test]
    fn refs_do_not_request_renders() {
        let (mut dispatcher, renders) = counting_dispatcher();
        let cell = dispatcher.scoped(env(), |scope| scope.use_ref(|| 0));
        cell.set(5);
        cell.with_mut(|value| *value += 1);
        assert_eq!(renders.load(Ordering::SeqCst), 0);

        let cell = dispatcher.scoped(env(), |scope| scope.use_ref(|| 0));
        assert_eq!(cell.get(), 6);
    }

    #[test]
    fn reducer_applies_actions() {
        let (mut dispatcher, renders) = counting_dispatcher();
        let reducer = |state: &i32, delta: i32| state + delta;

        let handle = dispatcher.scoped(env(), |scope| scope.use_reducer(|| 10, reducer));
        handle.dispatch(5);
        handle.dispatch(-2);
        assert_eq!(handle.state(), 13);
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memo_recomputes_only_on_new_deps() {
        let mut dispatcher = HookDispatcher::new(|| {});
        let computed = Arc::new(AtomicUsize::new(0));

        let mut pass = |deps: u8| {
            let counter = computed.clone();
            dispatcher.scoped(env(), move |scope| {
                scope.use_memo(deps, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    u32::from(deps) * 10
                })
            })
        };

        assert_eq!(pass(1), 10);
        assert_eq!(pass(1), 10);
        assert_eq!(pass(2), 20);
        assert_eq!(computed.load(Ordering::SeqCst), 2);
    }

    fn logging_effect(log: &Log, label: &'static str) -> impl FnOnce() -> Option<Cleanup> {
        let log = log.clone();
        move || {
            log.lock().push(format!("run {label}"));
            let log = log.clone();
            Some(Box::new(move || log.lock().push(format!("cleanup {label}"))) as Cleanup)
        }
    }

    #[test]
    fn effects_clean_up_before_rerun_and_on_dispose() {
        let log: Log = Arc::default();
        let mut dispatcher = HookDispatcher::new(|| {});

        for (deps, label) in [(1, "a"), (1, "b"), (2, "c")] {
            let effect = logging_effect(&log, label);
            dispatcher.scoped(env(), |scope| scope.use_effect(deps, effect));
        }
        dispatcher.dispose_all();

        assert_eq!(
            *log.lock(),
            vec!["run a", "cleanup a", "run c", "cleanup c"]
        );
    }

    #[test]
    fn effects_run_after_the_body_and_layout_effects_inline() {
        let log: Log = Arc::default();
        let mut dispatcher = HookDispatcher::new(|| {});

        let effect = logging_effect(&log, "effect");
        let layout = logging_effect(&log, "layout");
        let body_log = log.clone();
        dispatcher.scoped(env(), move |scope| {
            scope.use_effect((), effect);
            scope.use_layout_effect((), layout);
            body_log.lock().push("body end".into());
        });

        assert_eq!(*log.lock(), vec!["run layout", "body end", "run effect"]);
    }

    #[test]
    fn context_reads_the_current_environment() {
        let mut dispatcher = HookDispatcher::new(|| {});
        let found = dispatcher.scoped(env().with(7_u32), |scope| scope.use_context::<u32>());
        assert_eq!(found, Some(7));

        let missing = dispatcher.scoped(env(), |scope| scope.use_context::<u32>());
        assert_eq!(missing, None);
    }

    #[test]
    fn async_without_runtime_is_pending() {
        let mut dispatcher = HookDispatcher::new(|| {});
        let phase = dispatcher.scoped(env(), |scope| scope.use_async((), async { 1 }));
        assert_eq!(phase, Phase::Pending);
    }

    #[tokio::test]
    async fn async_hook_resolves_and_requests_render() {
        let (mut dispatcher, renders) = counting_dispatcher();

        let phase = dispatcher.scoped(env(), |scope| scope.use_async(1, async { "one" }));
        assert_eq!(phase, Phase::Running);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        let phase = dispatcher.scoped(env(), |scope| scope.use_async(1, async { "ignored" }));
        assert_eq!(phase, Phase::Success("one"));
    }

    #[tokio::test]
    async fn reassigning_async_cancels_the_previous_run() {
        let (mut dispatcher, renders) = counting_dispatcher();

        let slow = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            "slow"
        };
        dispatcher.scoped(env(), |scope| scope.use_async(1, slow));
        let phase = dispatcher.scoped(env(), |scope| scope.use_async(2, async { "fast" }));
        assert_eq!(phase, Phase::Running);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let phase = dispatcher.scoped(env(), |scope| scope.use_async(2, async { "unused" }));
        assert_eq!(phase, Phase::Success("fast"));
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disposing_cancels_a_running_async_hook() {
        let (mut dispatcher, renders) = counting_dispatcher();
        let landed = Arc::new(AtomicBool::new(false));

        let flag = landed.clone();
        let phase = dispatcher.scoped(env(), move |scope| {
            scope.use_async((), async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                flag.store(true, Ordering::SeqCst);
            })
        });
        assert_eq!(phase, Phase::Running);

        dispatcher.dispose_all();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!landed.load(Ordering::SeqCst));
        assert_eq!(renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn async_results_wait_for_a_pass_to_be_installed() {
        let requested = Arc::new(AtomicUsize::new(0));
        let counter = requested.clone();
        let request = RenderRequest::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let hook = UseAsync::new(async { 9_u8 });
        let coordinator = HookCoordinator::new(hook.make_state(), ViewUpdater::new(request), env());

        hook.update_state(&coordinator);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(requested.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state().phase, Phase::Running);
        assert_eq!(hook.value(&coordinator), Phase::Success(9));
        assert!(!coordinator.state().task.is_running());
    }
}
