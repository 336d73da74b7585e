//! Single-owner handles for asynchronous work.
//!
//! Every hook state or store entry that runs async work owns exactly one
//! [`TaskSlot`]. Starting a new generation aborts the previous one, and each
//! completion carries the generation it was started with so late results from
//! an aborted task can be recognised and dropped.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Owner of at most one live task.
#[derive(Debug, Default)]
pub struct TaskSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
    settled: bool,
}

impl TaskSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever is running and open a new generation.
    ///
    /// Returns the generation number completions must carry to be accepted.
    pub fn begin(&mut self) -> u64 {
        self.cancel();
        self.generation += 1;
        self.settled = false;
        self.generation
    }

    /// Attach the spawned task for the current generation.
    pub fn attach(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.handle.replace(handle) {
            previous.abort();
        }
    }

    /// Abort the live task, if any. Completions of the aborted generation are
    /// rejected afterwards.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::trace!(generation = self.generation, "aborted task");
        }
        self.generation += 1;
    }

    /// Whether `generation` is the one currently accepted.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Record that the current generation produced its first result.
    pub fn settle(&mut self) {
        self.settled = true;
    }

    /// Whether the current generation produced at least one result.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Record that the current generation finished; the handle is released
    /// without aborting.
    pub fn finish(&mut self) {
        self.settled = true;
        self.handle = None;
    }

    /// Whether a task is attached and has not finished.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Spawn `future` on `runtime`, or on the ambient tokio runtime when none is
/// given. Returns `None` when no runtime is reachable.
pub(crate) fn spawn<F>(runtime: Option<&Handle>, future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = match runtime {
        Some(handle) => handle.clone(),
        None => Handle::try_current().ok()?,
    };
    Some(handle.spawn(future))
}
