//! Per-fiber scheduling front-end over the timer thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::fiber::ExecutionContext;
use crate::queue::{PendingAction, Task};

use super::{TimerHandle, TimerThread};

/// Schedules deferred and recurring work onto one execution context.
///
/// Owned by a fiber; every live handle is tracked so disposal can cancel the
/// whole set at once. Entries hold a weak reference to the target context,
/// so a fire racing fiber teardown lands on nothing instead of a dead queue.
pub struct Scheduler {
    timer: Arc<TimerThread>,
    target: Weak<dyn ExecutionContext>,
    handles: Mutex<Vec<TimerHandle>>,
    disposed: AtomicBool,
}

impl Scheduler {
    /// Creates a scheduler using the process-wide shared timer thread.
    #[must_use]
    pub fn new(target: Weak<dyn ExecutionContext>) -> Self {
        Self::with_timer(target, TimerThread::shared())
    }

    /// Creates a scheduler using a caller-provided timer thread.
    #[must_use]
    pub fn with_timer(target: Weak<dyn ExecutionContext>, timer: Arc<TimerThread>) -> Self {
        Self {
            timer,
            target,
            handles: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Schedules `task` to run after `delay`.
    ///
    /// A zero delay skips the timer thread entirely: the task is wrapped in
    /// a [`PendingAction`] and enqueued immediately, keeping the cancel
    /// guarantee without arming a timer.
    pub fn schedule(&self, task: Task, delay: Duration) -> TimerHandle {
        if self.disposed.load(Ordering::Acquire) {
            return TimerHandle::already_cancelled();
        }
        let handle = if delay.is_zero() {
            let pending = PendingAction::new(task);
            let handle = TimerHandle::from_flag(pending.flag());
            if let Some(target) = self.target.upgrade() {
                if let Err(err) = target.enqueue_task(pending.into_task()) {
                    tracing::warn!(error = %err, "immediate schedule was not admitted");
                }
            }
            handle
        } else {
            self.timer
                .schedule_once(self.target.clone(), task, delay)
        };
        self.track(handle.clone());
        handle
    }

    /// Schedules `action` to run after `first`, then every `interval`.
    pub fn schedule_on_interval(
        &self,
        action: Arc<dyn Fn() + Send + Sync>,
        first: Duration,
        interval: Duration,
    ) -> TimerHandle {
        if self.disposed.load(Ordering::Acquire) {
            return TimerHandle::already_cancelled();
        }
        let handle = self
            .timer
            .schedule_repeating(self.target.clone(), action, first, interval);
        self.track(handle.clone());
        handle
    }

    /// Number of tracked handles, counting ones already cancelled or fired.
    #[must_use]
    pub fn tracked_handles(&self) -> usize {
        self.handles.lock().len()
    }

    /// Cancels every tracked handle. Further schedule calls return
    /// already-cancelled handles.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in &handles {
            handle.cancel();
        }
        tracing::debug!(cancelled = handles.len(), "scheduler disposed");
    }

    fn track(&self, handle: TimerHandle) {
        let mut handles = self.handles.lock();
        // Opportunistic prune so long-lived fibers don't accumulate dead
        // handles between disposals.
        if handles.len() % 64 == 63 {
            handles.retain(|h| !h.is_cancelled());
        }
        handles.push(handle);
        if self.disposed.load(Ordering::Acquire) {
            // Dispose raced this registration; sweep what it may have missed.
            for handle in handles.drain(..) {
                handle.cancel();
            }
        }
    }
}
