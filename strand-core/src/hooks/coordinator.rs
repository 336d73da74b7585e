//! Per-record handles passed to hook routines.
//!
//! A [`HookCoordinator`] bundles the persistent state of one hook record
//! with the environment of the current pass and a [`ViewUpdater`] that asks
//! the host for another pass. Hooks may clone the updater into async work and
//! call it later; requests from disposed records are ignored.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::environment::EnvironmentValues;

/// Host callback that schedules another pass.
pub type RenderCallback = Arc<dyn Fn() + Send + Sync>;

/// Coalesces re-render requests for one dispatcher.
///
/// The host callback fires on the first request after a pass starts; further
/// requests are absorbed until the next pass opens the window again.
pub(crate) struct RenderRequest {
    pending: AtomicBool,
    callback: RenderCallback,
}

impl RenderRequest {
    pub(crate) fn new(callback: RenderCallback) -> Arc<Self> {
        Arc::new(Self {
            pending: AtomicBool::new(false),
            callback,
        })
    }

    pub(crate) fn request(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            (self.callback)();
        }
    }

    /// Called when a pass starts.
    pub(crate) fn reopen(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

/// Asks the host to schedule one more pass.
#[derive(Clone)]
pub struct ViewUpdater {
    request: Arc<RenderRequest>,
    disposed: Arc<AtomicBool>,
}

impl ViewUpdater {
    pub(crate) fn new(request: Arc<RenderRequest>) -> Self {
        Self {
            request,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request a re-render. Fire-and-forget; repeated calls before the host
    /// runs the next pass collapse into one.
    pub fn request(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.request.request();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ViewUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewUpdater")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Access to one record's state during a pass.
pub struct HookCoordinator<S> {
    state: Arc<Mutex<S>>,
    updater: ViewUpdater,
    environment: EnvironmentValues,
}

impl<S> HookCoordinator<S> {
    pub(crate) fn new(state: S, updater: ViewUpdater, environment: EnvironmentValues) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            updater,
            environment,
        }
    }

    /// Same record, seen from a new pass.
    pub(crate) fn rebind(&self, environment: EnvironmentValues) -> Self {
        Self {
            state: Arc::clone(&self.state),
            updater: self.updater.clone(),
            environment,
        }
    }

    /// Lock the persistent state.
    pub fn state(&self) -> MutexGuard<'_, S> {
        self.state.lock()
    }

    /// Shared handle to the persistent state, for moving into callbacks.
    pub fn state_handle(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.state)
    }

    pub fn updater(&self) -> &ViewUpdater {
        &self.updater
    }

    pub fn environment(&self) -> &EnvironmentValues {
        &self.environment
    }

    pub fn is_disposed(&self) -> bool {
        self.updater.is_disposed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_request() -> (Arc<RenderRequest>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let request = RenderRequest::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (request, calls)
    }

    #[test]
    fn requests_coalesce_until_reopened() {
        let (request, calls) = counting_request();
        let updater = ViewUpdater::new(request.clone());

        updater.request();
        updater.request();
        updater.request();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        request.reopen();
        updater.request();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disposed_updater_is_inert() {
        let (request, calls) = counting_request();
        let updater = ViewUpdater::new(request);
        updater.mark_disposed();
        updater.request();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rebind_shares_state() {
        let (request, _) = counting_request();
        let coordinator =
            HookCoordinator::new(1, ViewUpdater::new(request), EnvironmentValues::default());
        let rebound = coordinator.rebind(EnvironmentValues::default());
        *rebound.state() = 5;
        assert_eq!(*coordinator.state(), 5);
        assert!(Arc::ptr_eq(&coordinator.state_handle(), &rebound.state_handle()));
    }
}
