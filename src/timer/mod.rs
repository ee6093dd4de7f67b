//! Deadline scheduling: a dedicated timer thread and per-fiber schedulers.
//!
//! One background thread tracks every live timer in a min-expiration heap
//! and sleeps exactly until the next deadline. Firing a timer never runs
//! user code on the timer thread; it enqueues the action onto the owning
//! execution context, where a second cancellation check runs before the
//! callback does.

mod scheduler;
mod thread;

pub use scheduler::Scheduler;
pub use thread::TimerThread;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation handle returned by every schedule call.
///
/// `cancel` is safe at any time, including concurrently with the timer
/// firing: the flag is checked both when the timer thread dispatches and
/// when the resulting action executes on the fiber, so a cancelled action
/// never runs after cancellation was requested.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle sharing an existing cancellation flag.
    pub(crate) fn from_flag(cancelled: Arc<AtomicBool>) -> Self {
        Self { cancelled }
    }

    /// A handle that is already cancelled; returned by disposed schedulers.
    pub(crate) fn already_cancelled() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Cancels the scheduled action. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if the action has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
