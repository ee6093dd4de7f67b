//! Cancellable one-shot actions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::Task;

/// An owned, cancellable wrapper around a one-shot callback.
///
/// The Active → Cancelled transition is one-way and checked at execution
/// time, so cancellation is idempotent and race-safe: an action cancelled
/// while already in flight on a queue becomes a no-op instead of running.
pub struct PendingAction {
    cancelled: Arc<AtomicBool>,
    task: Task,
}

impl PendingAction {
    /// Wraps `task` with a fresh cancellation flag.
    #[must_use]
    pub fn new(task: Task) -> Self {
        Self::with_flag(task, Arc::new(AtomicBool::new(false)))
    }

    /// Wraps `task` with an externally shared cancellation flag.
    pub(crate) fn with_flag(task: Task, cancelled: Arc<AtomicBool>) -> Self {
        Self { cancelled, task }
    }

    /// Marks the action cancelled. Safe to call at any time, including
    /// concurrently with execution on another thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if the action has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Shares the cancellation flag, letting a handle outlive the action.
    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Runs the callback unless the action was cancelled first.
    pub fn execute(self) {
        if !self.cancelled.load(Ordering::Acquire) {
            (self.task)();
        }
    }

    /// Converts into a plain task for enqueueing; the cancellation check
    /// still happens when the queue executes it.
    #[must_use]
    pub fn into_task(self) -> Task {
        Box::new(move || self.execute())
    }
}

impl std::fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAction")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
