//! Fiber multiplexed onto a shared worker pool.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::channel::Subscription;
use crate::error::{EnqueueError, LifecycleError};
use crate::pool::WorkerPool;
use crate::queue::{BatchExecutor, DefaultExecutor, Task};
use crate::timer::{Scheduler, TimerHandle, TimerThread};

use super::{ExecutionContext, Fiber, Lifecycle, SubscriptionRegistry};

struct PoolFiberState {
    lifecycle: Lifecycle,
    pending: Vec<Task>,
    flush_in_flight: bool,
}

struct PoolFiberShared {
    pool: Arc<dyn WorkerPool>,
    executor: Arc<dyn BatchExecutor>,
    state: Mutex<PoolFiberState>,
    /// Needed to hand the flush work item an owning reference to ourselves.
    self_weak: Weak<PoolFiberShared>,
}

impl ExecutionContext for PoolFiberShared {
    fn enqueue_task(&self, task: Task) -> Result<(), EnqueueError> {
        let submit = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match &mut state.lifecycle {
                Lifecycle::Created { backlog } => {
                    backlog.push(task);
                    return Ok(());
                }
                Lifecycle::Stopped => {
                    tracing::trace!("task dropped, fiber stopped");
                    return Ok(());
                }
                Lifecycle::Running => {
                    state.pending.push(task);
                    if state.flush_in_flight {
                        false
                    } else {
                        state.flush_in_flight = true;
                        true
                    }
                }
            }
        };
        if submit {
            if let Some(shared) = self.self_weak.upgrade() {
                submit_flush(&shared)?;
            }
        }
        Ok(())
    }
}

/// Submits one flush work item; on rejection the in-flight flag is reset so
/// a later enqueue can try again.
fn submit_flush(shared: &Arc<PoolFiberShared>) -> Result<(), EnqueueError> {
    let worker = Arc::clone(shared);
    let work: Task = Box::new(move || run_flush(&worker));
    if let Err(err) = shared.pool.submit(work) {
        shared.state.lock().flush_in_flight = false;
        return Err(err);
    }
    Ok(())
}

fn run_flush(shared: &Arc<PoolFiberShared>) {
    let mut batch = std::mem::take(&mut shared.state.lock().pending);
    shared.executor.execute_batch(&mut batch);
    let resubmit = {
        let mut state = shared.state.lock();
        if state.pending.is_empty() || matches!(state.lifecycle, Lifecycle::Stopped) {
            state.flush_in_flight = false;
            false
        } else {
            true
        }
    };
    // More work arrived while we were executing: go to the back of the
    // pool's line instead of looping here, so one fiber cannot monopolize
    // a shared worker thread.
    if resubmit {
        if let Err(err) = submit_flush(shared) {
            tracing::warn!(error = %err, "pool fiber flush resubmission rejected");
        }
    }
}

/// A fiber without a thread of its own.
///
/// Tasks accumulate in a pending list; at most one work item per fiber is
/// ever active in the backing pool, which preserves single-threaded-apparent
/// execution while many pool fibers share a few worker threads.
pub struct PoolFiber {
    shared: Arc<PoolFiberShared>,
    scheduler: Scheduler,
    subscriptions: SubscriptionRegistry,
}

impl PoolFiber {
    /// A pool fiber with the default executor.
    #[must_use]
    pub fn new(pool: Arc<dyn WorkerPool>) -> Self {
        Self::with_executor(pool, Arc::new(DefaultExecutor::new()))
    }

    /// A pool fiber with a caller-chosen batch executor.
    #[must_use]
    pub fn with_executor(pool: Arc<dyn WorkerPool>, executor: Arc<dyn BatchExecutor>) -> Self {
        Self::build(pool, executor, None)
    }

    /// A pool fiber scheduling through a caller-owned timer thread.
    #[must_use]
    pub fn with_timer(pool: Arc<dyn WorkerPool>, timer: Arc<TimerThread>) -> Self {
        Self::build(pool, Arc::new(DefaultExecutor::new()), Some(timer))
    }

    fn build(
        pool: Arc<dyn WorkerPool>,
        executor: Arc<dyn BatchExecutor>,
        timer: Option<Arc<TimerThread>>,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak| PoolFiberShared {
            pool,
            executor,
            state: Mutex::new(PoolFiberState {
                lifecycle: Lifecycle::new(),
                pending: Vec::new(),
                flush_in_flight: false,
            }),
            self_weak: weak.clone(),
        });
        let shared_dyn: Arc<dyn ExecutionContext> = shared.clone();
        let target: Weak<dyn ExecutionContext> = Arc::downgrade(&shared_dyn);
        let scheduler = match timer {
            Some(timer) => Scheduler::with_timer(target, timer),
            None => Scheduler::new(target),
        };
        Self {
            shared,
            scheduler,
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    /// Number of tasks waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

impl ExecutionContext for PoolFiber {
    fn enqueue_task(&self, task: Task) -> Result<(), EnqueueError> {
        self.shared.enqueue_task(task)
    }
}

impl Fiber for PoolFiber {
    fn start(&self) -> Result<(), LifecycleError> {
        let submit = {
            let mut state = self.shared.state.lock();
            let backlog = match &mut state.lifecycle {
                Lifecycle::Created { backlog } => std::mem::take(backlog),
                Lifecycle::Running => return Err(LifecycleError::AlreadyStarted),
                Lifecycle::Stopped => return Err(LifecycleError::Disposed),
            };
            state.lifecycle = Lifecycle::Running;
            if backlog.is_empty() {
                false
            } else {
                state.pending = backlog;
                state.flush_in_flight = true;
                true
            }
        };
        if submit {
            if let Err(err) = submit_flush(&self.shared) {
                tracing::warn!(error = %err, "buffered tasks not admitted at start");
            }
        }
        tracing::debug!("pool fiber started");
        Ok(())
    }

    fn dispose(&self) {
        {
            let mut state = self.shared.state.lock();
            if matches!(state.lifecycle, Lifecycle::Stopped) {
                return;
            }
            state.lifecycle = Lifecycle::Stopped;
            state.pending.clear();
        }
        self.scheduler.dispose();
        self.subscriptions.dispose_all();
        self.shared.executor.disable();
        tracing::debug!("pool fiber disposed");
    }

    fn schedule_task(&self, task: Task, delay: Duration) -> TimerHandle {
        self.scheduler.schedule(task, delay)
    }

    fn schedule_task_on_interval(
        &self,
        action: Arc<dyn Fn() + Send + Sync>,
        first: Duration,
        interval: Duration,
    ) -> TimerHandle {
        self.scheduler.schedule_on_interval(action, first, interval)
    }

    fn register_subscription(&self, subscription: Subscription) {
        self.subscriptions.register(subscription);
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Drop for PoolFiber {
    fn drop(&mut self) {
        self.dispose();
    }
}
