//! Dedicated timer thread with a min-expiration heap.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::fiber::ExecutionContext;
use crate::queue::{PendingAction, Task};

use super::TimerHandle;

/// Floor for timed waits; sub-millisecond deadlines batch into one wake.
const MIN_WAIT: Duration = Duration::from_millis(1);

enum Payload {
    Once(Option<Task>),
    Repeating {
        interval: Duration,
        action: Arc<dyn Fn() + Send + Sync>,
    },
}

struct TimerEntry {
    deadline: Instant,
    /// Tie-break so equal deadlines fire in registration order.
    generation: u64,
    cancelled: Arc<AtomicBool>,
    target: Weak<dyn ExecutionContext>,
    payload: Payload,
}

impl TimerEntry {
    /// Dispatches the entry; returns the entry re-armed if it recurs.
    fn fire(mut self) -> Option<Self> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let Some(target) = self.target.upgrade() else {
            // Owning fiber is gone; dropping the entry is the safe no-op.
            return None;
        };
        match self.payload {
            Payload::Once(ref mut slot) => {
                if let Some(task) = slot.take() {
                    let pending = PendingAction::with_flag(task, Arc::clone(&self.cancelled));
                    if let Err(err) = target.enqueue_task(pending.into_task()) {
                        tracing::warn!(error = %err, "one-shot timer fire was not admitted");
                    }
                }
                None
            }
            Payload::Repeating {
                interval,
                ref action,
            } => {
                let flag = Arc::clone(&self.cancelled);
                let action = Arc::clone(action);
                let task: Task = Box::new(move || {
                    if !flag.load(Ordering::Acquire) {
                        (action)();
                    }
                });
                if let Err(err) = target.enqueue_task(task) {
                    tracing::warn!(error = %err, "recurring timer fire was not admitted");
                }
                self.deadline = Instant::now() + interval;
                Some(self)
            }
        }
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct TimerInner {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
    shutdown: bool,
}

struct TimerShared {
    inner: Mutex<TimerInner>,
    tick: Condvar,
}

/// One background thread servicing many timers.
///
/// Registrations go into a heap ordered by absolute deadline; the thread
/// sleeps exactly until the earliest deadline (recomputed on every wake) and
/// dispatches expired entries outside the lock. A recurring entry re-arms
/// itself from the dispatch time; a one-shot entry is terminal.
pub struct TimerThread {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimerThread {
    /// Spawns the timer thread.
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            inner: Mutex::new(TimerInner {
                heap: BinaryHeap::new(),
                next_generation: 0,
                shutdown: false,
            }),
            tick: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("strand-timer".to_string())
            .spawn(move || worker_loop(&worker))
            .expect("failed to spawn timer thread");
        tracing::debug!("timer thread started");
        Self {
            shared,
            thread: Mutex::new(Some(handle)),
        }
    }

    /// The process-wide shared instance, started on first use.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<TimerThread>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
    }

    /// Arms a one-shot timer that enqueues `task` onto `target` after
    /// `delay`.
    pub fn schedule_once(
        &self,
        target: Weak<dyn ExecutionContext>,
        task: Task,
        delay: Duration,
    ) -> TimerHandle {
        let handle = TimerHandle::new();
        self.register(TimerEntry {
            deadline: Instant::now() + delay,
            generation: 0,
            cancelled: handle.flag(),
            target,
            payload: Payload::Once(Some(task)),
        });
        handle
    }

    /// Arms a recurring timer: first fire after `first`, then every
    /// `interval`.
    pub fn schedule_repeating(
        &self,
        target: Weak<dyn ExecutionContext>,
        action: Arc<dyn Fn() + Send + Sync>,
        first: Duration,
        interval: Duration,
    ) -> TimerHandle {
        let handle = TimerHandle::new();
        self.register(TimerEntry {
            deadline: Instant::now() + first,
            generation: 0,
            cancelled: handle.flag(),
            target,
            payload: Payload::Repeating { interval, action },
        });
        handle
    }

    /// Number of timers currently registered.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared
            .inner
            .lock()
            .expect("timer lock poisoned")
            .heap
            .len()
    }

    /// Stops the timer thread; registered timers never fire afterwards.
    pub fn shutdown(&self) {
        {
            let mut inner = self.shared.inner.lock().expect("timer lock poisoned");
            inner.shutdown = true;
            inner.heap.clear();
        }
        self.tick_notify();
        if let Some(handle) = self.thread.lock().expect("timer lock poisoned").take() {
            let _ = handle.join();
        }
        tracing::debug!("timer thread stopped");
    }

    fn register(&self, mut entry: TimerEntry) {
        let mut inner = self.shared.inner.lock().expect("timer lock poisoned");
        if inner.shutdown {
            entry.cancelled.store(true, Ordering::Release);
            return;
        }
        entry.generation = inner.next_generation;
        inner.next_generation += 1;
        inner.heap.push(entry);
        drop(inner);
        self.tick_notify();
    }

    fn tick_notify(&self) {
        let _guard = self.shared.inner.lock().expect("timer lock poisoned");
        self.shared.tick.notify_one();
    }
}

impl Default for TimerThread {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        let already_stopped = self
            .thread
            .lock()
            .map(|t| t.is_none())
            .unwrap_or(true);
        if !already_stopped {
            self.shutdown();
        }
    }
}

fn worker_loop(shared: &TimerShared) {
    let mut inner = shared.inner.lock().expect("timer lock poisoned");
    loop {
        if inner.shutdown {
            return;
        }

        let now = Instant::now();
        let mut due = Vec::new();
        while inner
            .heap
            .peek()
            .is_some_and(|entry| entry.deadline <= now)
        {
            let Some(entry) = inner.heap.pop() else {
                break;
            };
            due.push(entry);
        }

        if !due.is_empty() {
            // Dispatch without the lock: enqueueing onto a bounded fiber
            // queue may block, and registrations must stay possible.
            drop(inner);
            let mut rearmed = Vec::new();
            for entry in due {
                if let Some(next) = entry.fire() {
                    rearmed.push(next);
                }
            }
            inner = shared.inner.lock().expect("timer lock poisoned");
            for entry in rearmed {
                inner.heap.push(entry);
            }
            continue;
        }

        inner = match inner.heap.peek() {
            Some(entry) => {
                let wait = entry
                    .deadline
                    .saturating_duration_since(Instant::now())
                    .max(MIN_WAIT);
                let (guard, _) = shared
                    .tick
                    .wait_timeout(inner, wait)
                    .expect("timer lock poisoned");
                guard
            }
            None => shared.tick.wait(inner).expect("timer lock poisoned"),
        };
    }
}
