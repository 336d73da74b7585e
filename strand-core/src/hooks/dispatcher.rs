//! Positional Reconciler
//!
//! The dispatcher owns the record list of one host node. Each call to
//! [`HookDispatcher::scoped`] is a *pass*: the render body calls hooks in a
//! fixed order and every call is matched to the record at the same position.
//!
//! # Algorithm
//!
//! For each [`HookScope::use_hook`] call:
//!
//! 1. No record at the cursor: create the state with `make_state`, append a
//!    record, then update it now or queue the update for after the body.
//! 2. A record of the same hook type: compare update strategies. If they
//!    differ (or either side has none) update now or defer; otherwise keep
//!    the state as is. The record is swapped in place so the new hook value
//!    is the one seen on the next pass.
//! 3. A record of a different hook type: report a violation, dispose the
//!    suffix from the cursor (last-added first) and append a fresh record.
//!
//! After the body returns, deferred updates run in call order. Records the
//! pass never reached are disposed in reverse order and reported.
//!
//! # Ownership
//!
//! `scoped` takes `&mut self`, and the [`HookScope`] handed to the body
//! borrows the dispatcher for the whole pass. Two passes on one dispatcher
//! cannot overlap.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::coordinator::{HookCoordinator, RenderCallback, RenderRequest, ViewUpdater};
use super::environment::EnvironmentValues;
use super::records::RecordList;
use super::strategy::UpdateStrategy;
use crate::error::Violation;

/// A unit of persistent state attached to a call position.
pub trait Hook: 'static {
    /// Persistent state, created once per record.
    type State: 'static;

    /// What the render body receives.
    type Value;

    /// Run `update_state` after the render body instead of inline.
    const DEFERS_UPDATE: bool = false;

    /// `None` means the state is updated on every pass.
    fn update_strategy(&self) -> Option<UpdateStrategy> {
        None
    }

    fn make_state(&self) -> Self::State;

    fn value(&self, coordinator: &HookCoordinator<Self::State>) -> Self::Value;

    fn update_state(&self, _coordinator: &HookCoordinator<Self::State>) {}

    /// Release resources held by `state`. Called at most once per record.
    fn dispose(&self, _state: &mut Self::State) {}
}

/// A hook paired with its persistent state.
pub(crate) struct HookRecord<H: Hook> {
    hook: H,
    coordinator: HookCoordinator<H::State>,
    disposed: bool,
}

impl<H: Hook> HookRecord<H> {
    fn new(hook: H, updater: ViewUpdater, environment: EnvironmentValues) -> Self {
        let state = hook.make_state();
        Self {
            hook,
            coordinator: HookCoordinator::new(state, updater, environment),
            disposed: false,
        }
    }
}

/// Object-safe view of a record of any hook type.
pub(crate) trait AnyRecord {
    fn hook_name(&self) -> &'static str;
    fn run_update(&self);
    fn dispose(&mut self);
    fn as_any(&self) -> &dyn Any;
}

impl<H: Hook> AnyRecord for HookRecord<H> {
    fn hook_name(&self) -> &'static str {
        type_name::<H>()
    }

    fn run_update(&self) {
        if !self.disposed {
            self.hook.update_state(&self.coordinator);
        }
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.coordinator.updater().mark_disposed();
        let mut state = self.coordinator.state();
        self.hook.dispose(&mut state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Owns the hook records of one host node.
pub struct HookDispatcher {
    records: RecordList<Box<dyn AnyRecord>>,
    request: Arc<RenderRequest>,
}

impl HookDispatcher {
    /// Create a dispatcher. `update_view` is the host's re-render callback.
    pub fn new<F>(update_view: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_callback(Arc::new(update_view))
    }

    pub fn with_callback(update_view: RenderCallback) -> Self {
        Self {
            records: RecordList::new(),
            request: RenderRequest::new(update_view),
        }
    }

    /// Run one pass of `body`.
    pub fn scoped<R>(
        &mut self,
        environment: EnvironmentValues,
        body: impl FnOnce(&mut HookScope<'_>) -> R,
    ) -> R {
        self.request.reopen();
        tracing::trace!(records = self.records.len(), "hook pass started");

        let mut scope = HookScope {
            dispatcher: self,
            environment,
            cursor: 0,
            deferred: SmallVec::new(),
        };
        let result = body(&mut scope);
        scope.finish();
        result
    }

    /// Dispose every record, most recently added first.
    pub fn dispose_all(&mut self) {
        let records = self.records.clear();
        if !records.is_empty() {
            tracing::debug!(count = records.len(), "disposing all hook records");
        }
        dispose_in_reverse(records);
    }

    /// Number of live records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl Drop for HookDispatcher {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

impl fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDispatcher")
            .field(
                "records",
                &self.records.iter().map(|r| r.hook_name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn dispose_in_reverse(records: Vec<Box<dyn AnyRecord>>) {
    for mut record in records.into_iter().rev() {
        record.dispose();
    }
}

/// One pass in progress. Handed to the render body by
/// [`HookDispatcher::scoped`].
pub struct HookScope<'a> {
    dispatcher: &'a mut HookDispatcher,
    environment: EnvironmentValues,
    cursor: usize,
    deferred: SmallVec<[usize; 8]>,
}

impl HookScope<'_> {
    /// Evaluate `hook` at the next position.
    pub fn use_hook<H: Hook>(&mut self, hook: H) -> H::Value {
        let position = self.cursor;
        self.cursor += 1;

        let previous = self
            .dispatcher
            .records
            .get(position)
            .map(|record| match record.as_any().downcast_ref::<HookRecord<H>>() {
                Some(existing) => Ok((
                    existing.coordinator.rebind(self.environment.clone()),
                    existing.hook.update_strategy(),
                )),
                None => Err(record.hook_name()),
            });

        match previous {
            None => self.append(position, hook),
            Some(Ok((coordinator, old_strategy))) => {
                let should_update = UpdateStrategy::requires_update(
                    old_strategy.as_ref(),
                    hook.update_strategy().as_ref(),
                );
                let record = HookRecord {
                    hook,
                    coordinator,
                    disposed: false,
                };
                self.settle(position, record, should_update)
            }
            Some(Err(previous)) => {
                let violation = Violation::TypeMismatch {
                    position,
                    previous,
                    current: type_name::<H>(),
                };
                let stale = self.dispatcher.records.drop_suffix(position);
                tracing::debug!(position, count = stale.len(), "dropping mismatched hook suffix");
                dispose_in_reverse(stale);
                self.environment.config().report(&violation);
                self.append(position, hook)
            }
        }
    }

    /// The environment snapshot of this pass.
    pub fn environment(&self) -> &EnvironmentValues {
        &self.environment
    }

    fn append<H: Hook>(&mut self, position: usize, hook: H) -> H::Value {
        let updater = ViewUpdater::new(Arc::clone(&self.dispatcher.request));
        let record = HookRecord::new(hook, updater, self.environment.clone());
        debug_assert_eq!(self.dispatcher.records.len(), position);
        self.dispatcher.records.append(Box::new(record));
        self.after_placement::<H>(position, true)
    }

    fn settle<H: Hook>(
        &mut self,
        position: usize,
        record: HookRecord<H>,
        should_update: bool,
    ) -> H::Value {
        if self.dispatcher.records.swap(position, Box::new(record)).is_err() {
            unreachable!("record at {position} vanished during its own pass");
        }
        self.after_placement::<H>(position, should_update)
    }

    fn after_placement<H: Hook>(&mut self, position: usize, should_update: bool) -> H::Value {
        if should_update {
            if H::DEFERS_UPDATE {
                self.deferred.push(position);
            } else if let Some(record) = self.dispatcher.records.get(position) {
                record.run_update();
            }
        }

        let record = self
            .dispatcher
            .records
            .get(position)
            .and_then(|record| record.as_any().downcast_ref::<HookRecord<H>>());
        match record {
            Some(record) => record.hook.value(&record.coordinator),
            None => unreachable!("record at {position} is not a `{}`", type_name::<H>()),
        }
    }

    fn finish(mut self) {
        for position in std::mem::take(&mut self.deferred) {
            if let Some(record) = self.dispatcher.records.get(position) {
                record.run_update();
            }
        }

        let leftover = self.dispatcher.records.drop_suffix(self.cursor);
        if !leftover.is_empty() {
            let violation = Violation::LeftoverRecords {
                count: leftover.len(),
            };
            dispose_in_reverse(leftover);
            self.environment.config().report(&violation);
        }
        tracing::trace!(records = self.dispatcher.records.len(), "hook pass finished");
    }
}
