//! Deterministic fiber executing on the calling thread.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::Subscription;
use crate::error::{EnqueueError, LifecycleError};
use crate::queue::{PendingAction, Task};
use crate::timer::TimerHandle;

use super::{ExecutionContext, Fiber, SubscriptionRegistry};

struct StubInner {
    executing: bool,
    stopped: bool,
    pending: VecDeque<Task>,
}

enum StubPayload {
    Once(Option<Task>),
    Repeating(Arc<dyn Fn() + Send + Sync>),
}

struct StubScheduled {
    handle: TimerHandle,
    payload: StubPayload,
}

/// Test fiber that runs every enqueued task immediately, with a re-entrancy
/// guard.
///
/// A task enqueued while another is executing is deferred to a FIFO list
/// and drained (explicitly, not recursively) after the root task completes,
/// giving run-to-completion semantics deterministic enough to assert
/// against.
///
/// Scheduled work never runs on a wall clock here: delayed and recurring
/// actions park in a list until the test calls
/// [`run_scheduled`](StubFiber::run_scheduled), which fires each live entry
/// exactly once.
pub struct StubFiber {
    inner: Mutex<StubInner>,
    scheduled: Mutex<Vec<StubScheduled>>,
    subscriptions: SubscriptionRegistry,
}

impl StubFiber {
    /// Creates a stub fiber; no `start` call is required.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StubInner {
                executing: false,
                stopped: false,
                pending: VecDeque::new(),
            }),
            scheduled: Mutex::new(Vec::new()),
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    /// Fires every live scheduled entry once, in scheduling order.
    ///
    /// One-shot entries are consumed; recurring entries stay armed for the
    /// next call. Cancelled entries are discarded without firing.
    pub fn run_scheduled(&self) {
        let entries = std::mem::take(&mut *self.scheduled.lock().expect("stub lock poisoned"));
        let mut keep = Vec::new();
        for mut entry in entries {
            if entry.handle.is_cancelled() {
                continue;
            }
            match &mut entry.payload {
                StubPayload::Once(slot) => {
                    if let Some(task) = slot.take() {
                        let pending = PendingAction::with_flag(task, entry.handle.flag());
                        let _ = self.enqueue_task(pending.into_task());
                    }
                }
                StubPayload::Repeating(action) => {
                    let action = Arc::clone(action);
                    let flag = entry.handle.flag();
                    let _ = self.enqueue_task(Box::new(move || {
                        if !flag.load(Ordering::Acquire) {
                            (action)();
                        }
                    }));
                    keep.push(entry);
                }
            }
        }
        self.scheduled
            .lock()
            .expect("stub lock poisoned")
            .extend(keep);
    }

    /// Number of parked scheduled entries, cancelled ones included.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.lock().expect("stub lock poisoned").len()
    }
}

impl Default for StubFiber {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext for StubFiber {
    fn enqueue_task(&self, task: Task) -> Result<(), EnqueueError> {
        {
            let mut inner = self.inner.lock().expect("stub lock poisoned");
            if inner.stopped {
                return Ok(());
            }
            if inner.executing {
                inner.pending.push_back(task);
                return Ok(());
            }
            inner.executing = true;
        }
        task();
        loop {
            let next = {
                let mut inner = self.inner.lock().expect("stub lock poisoned");
                if inner.stopped {
                    inner.executing = false;
                    inner.pending.clear();
                    return Ok(());
                }
                match inner.pending.pop_front() {
                    Some(task) => task,
                    None => {
                        inner.executing = false;
                        return Ok(());
                    }
                }
            };
            next();
        }
    }
}

impl Fiber for StubFiber {
    fn start(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    fn dispose(&self) {
        {
            let mut inner = self.inner.lock().expect("stub lock poisoned");
            inner.stopped = true;
            inner.pending.clear();
        }
        let scheduled = std::mem::take(&mut *self.scheduled.lock().expect("stub lock poisoned"));
        for entry in &scheduled {
            entry.handle.cancel();
        }
        self.subscriptions.dispose_all();
    }

    fn schedule_task(&self, task: Task, delay: Duration) -> TimerHandle {
        if delay.is_zero() {
            let pending = PendingAction::new(task);
            let handle = TimerHandle::from_flag(pending.flag());
            let _ = self.enqueue_task(pending.into_task());
            return handle;
        }
        let handle = TimerHandle::new();
        self.scheduled
            .lock()
            .expect("stub lock poisoned")
            .push(StubScheduled {
                handle: handle.clone(),
                payload: StubPayload::Once(Some(task)),
            });
        handle
    }

    fn schedule_task_on_interval(
        &self,
        action: Arc<dyn Fn() + Send + Sync>,
        _first: Duration,
        _interval: Duration,
    ) -> TimerHandle {
        let handle = TimerHandle::new();
        self.scheduled
            .lock()
            .expect("stub lock poisoned")
            .push(StubScheduled {
                handle: handle.clone(),
                payload: StubPayload::Repeating(action),
            });
        handle
    }

    fn register_subscription(&self, subscription: Subscription) {
        self.subscriptions.register(subscription);
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::{ExecutionContextExt, FiberExt};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn executes_immediately() {
        let fiber = StubFiber::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        fiber
            .enqueue(move || {
                h.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn nested_enqueues_drain_fifo_after_root() {
        let fiber = Arc::new(StubFiber::new());
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let f = Arc::clone(&fiber);
        let l = Arc::clone(&log);
        fiber
            .enqueue(move || {
                l.lock().push("root-begin");
                let l2 = Arc::clone(&l);
                let _ = f.enqueue(move || l2.lock().push("nested-1"));
                let l3 = Arc::clone(&l);
                let _ = f.enqueue(move || l3.lock().push("nested-2"));
                l.lock().push("root-end");
            })
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["root-begin", "root-end", "nested-1", "nested-2"]
        );
    }

    #[test]
    fn scheduled_work_waits_for_explicit_fire() {
        let fiber = StubFiber::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        fiber.schedule(
            move || {
                h.fetch_add(1, Ordering::Relaxed);
            },
            Duration::from_millis(100),
        );
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        fiber.run_scheduled();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        // One-shot entries are consumed.
        fiber.run_scheduled();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn recurring_entries_fire_each_round() {
        let fiber = StubFiber::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let handle = fiber.schedule_on_interval(
            move || {
                h.fetch_add(1, Ordering::Relaxed);
            },
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        fiber.run_scheduled();
        fiber.run_scheduled();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
        handle.cancel();
        fiber.run_scheduled();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn dispose_stops_everything() {
        let fiber = StubFiber::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        fiber.schedule(
            move || {
                h.fetch_add(1, Ordering::Relaxed);
            },
            Duration::from_millis(10),
        );
        fiber.dispose();
        fiber.run_scheduled();
        let h = Arc::clone(&hits);
        fiber
            .enqueue(move || {
                h.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }
}
