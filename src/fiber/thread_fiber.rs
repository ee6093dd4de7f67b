//! Fiber backed by one dedicated OS thread.

use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::Subscription;
use crate::config::{QueueSettings, ThreadSettings};
use crate::error::{EnqueueError, LifecycleError};
use crate::queue::{ActionQueue, BatchExecutor, DefaultExecutor, Task, TaskQueue};
use crate::timer::{Scheduler, TimerHandle, TimerThread};

use super::{ExecutionContext, Fiber, Lifecycle, SubscriptionRegistry};

struct ThreadFiberShared {
    queue: Arc<dyn TaskQueue>,
    state: Mutex<Lifecycle>,
}

impl ExecutionContext for ThreadFiberShared {
    fn enqueue_task(&self, task: Task) -> Result<(), EnqueueError> {
        let mut state = self.state.lock().expect("fiber state lock poisoned");
        match &mut *state {
            Lifecycle::Created { backlog } => {
                backlog.push(task);
                return Ok(());
            }
            Lifecycle::Stopped => {
                tracing::trace!("task dropped, fiber stopped");
                return Ok(());
            }
            Lifecycle::Running => {}
        }
        drop(state);
        match self.queue.enqueue(task) {
            // The queue stopped between the state check and the admission;
            // same silent-discard contract as Stopped.
            Err(EnqueueError::Stopped) => {
                tracing::trace!("task dropped, fiber stopped mid-enqueue");
                Ok(())
            }
            other => other,
        }
    }
}

/// A fiber that runs its queue loop on one dedicated, named OS thread.
///
/// `start` spawns the thread; `dispose` cancels timers, unsubscribes
/// channels, and stops the queue, releasing the thread. A panicking task
/// unwinds the thread under the default executor; supply a
/// [`PanicTrapExecutor`](crate::queue::PanicTrapExecutor) to keep the loop
/// alive instead.
pub struct ThreadFiber {
    shared: Arc<ThreadFiberShared>,
    scheduler: Scheduler,
    subscriptions: SubscriptionRegistry,
    executor: Arc<dyn BatchExecutor>,
    settings: ThreadSettings,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadFiber {
    /// A fiber with default settings: unbounded queue, default thread name.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring a fiber.
    #[must_use]
    pub fn builder() -> ThreadFiberBuilder {
        ThreadFiberBuilder {
            thread: ThreadSettings::default(),
            queue_settings: QueueSettings::default(),
            queue: None,
            executor: None,
            timer: None,
        }
    }

    /// Waits for the fiber thread to exit. Call after [`Fiber::dispose`];
    /// calling from the fiber's own thread would deadlock.
    pub fn join(&self) {
        let handle = self.thread.lock().expect("fiber thread lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Number of tasks waiting in the backing queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Default for ThreadFiber {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext for ThreadFiber {
    fn enqueue_task(&self, task: Task) -> Result<(), EnqueueError> {
        self.shared.enqueue_task(task)
    }
}

impl Fiber for ThreadFiber {
    fn start(&self) -> Result<(), LifecycleError> {
        {
            let mut state = self.shared.state.lock().expect("fiber state lock poisoned");
            let backlog = match &mut *state {
                Lifecycle::Created { backlog } => std::mem::take(backlog),
                Lifecycle::Running => return Err(LifecycleError::AlreadyStarted),
                Lifecycle::Stopped => return Err(LifecycleError::Disposed),
            };
            // Flush under the state lock so nothing enqueued after start()
            // can slot in ahead of the buffered tasks.
            for task in backlog {
                if let Err(err) = self.shared.queue.enqueue(task) {
                    tracing::warn!(error = %err, "buffered task not admitted at start");
                }
            }
            *state = Lifecycle::Running;
        }

        let queue = Arc::clone(&self.shared.queue);
        let executor = Arc::clone(&self.executor);
        let mut builder = thread::Builder::new().name(self.settings.name.clone());
        if let Some(bytes) = self.settings.stack_size {
            builder = builder.stack_size(bytes);
        }
        let handle = builder
            .spawn(move || queue.run(executor.as_ref()))
            .expect("failed to spawn fiber thread");
        *self.thread.lock().expect("fiber thread lock poisoned") = Some(handle);
        tracing::debug!(name = %self.settings.name, "fiber started");
        Ok(())
    }

    fn dispose(&self) {
        {
            let mut state = self.shared.state.lock().expect("fiber state lock poisoned");
            if matches!(*state, Lifecycle::Stopped) {
                return;
            }
            *state = Lifecycle::Stopped;
        }
        // Teardown order matters: timers stop first so no fire can target a
        // queue that is being torn down, subscriptions go next so producers
        // stop feeding us, then the queue releases the thread.
        self.scheduler.dispose();
        self.subscriptions.dispose_all();
        self.executor.disable();
        self.shared.queue.stop();
        tracing::debug!(name = %self.settings.name, "fiber disposed");
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

impl Drop for ThreadFiber {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Configures and builds a [`ThreadFiber`].
pub struct ThreadFiberBuilder {
    thread: ThreadSettings,
    queue_settings: QueueSettings,
    queue: Option<Arc<dyn TaskQueue>>,
    executor: Option<Arc<dyn BatchExecutor>>,
    timer: Option<Arc<TimerThread>>,
}

impl ThreadFiberBuilder {
    /// Sets the OS thread name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.thread.name = name.into();
        self
    }

    /// Sets the thread settings wholesale.
    #[must_use]
    pub fn thread_settings(mut self, settings: ThreadSettings) -> Self {
        self.thread = settings;
        self
    }

    /// Sets admission settings for the default backing queue.
    #[must_use]
    pub fn queue_settings(mut self, settings: QueueSettings) -> Self {
        self.queue_settings = settings;
        self
    }

    /// Replaces the backing queue, e.g. with a
    /// [`BusyWaitQueue`](crate::queue::BusyWaitQueue).
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Replaces the batch executor, e.g. with a
    /// [`PanicTrapExecutor`](crate::queue::PanicTrapExecutor).
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn BatchExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Uses a caller-owned timer thread instead of the shared one.
    #[must_use]
    pub fn timer(mut self, timer: Arc<TimerThread>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Builds the fiber in the `Created` state.
    #[must_use]
    pub fn build(self) -> ThreadFiber {
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(ActionQueue::new(self.queue_settings)));
        let shared = Arc::new(ThreadFiberShared {
            queue,
            state: Mutex::new(Lifecycle::new()),
        });
        let shared_dyn: Arc<dyn ExecutionContext> = shared.clone();
        let target: Weak<dyn ExecutionContext> = Arc::downgrade(&shared_dyn);
        let scheduler = match self.timer {
            Some(timer) => Scheduler::with_timer(target, timer),
            None => Scheduler::new(target),
        };
        ThreadFiber {
            shared,
            scheduler,
            subscriptions: SubscriptionRegistry::new(),
            executor: self
                .executor
                .unwrap_or_else(|| Arc::new(DefaultExecutor::new())),
            settings: self.thread,
            thread: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::{ExecutionContextExt, FiberExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn executes_enqueued_work_after_start() {
        let fiber = ThreadFiber::new();
        fiber.start().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        fiber
            .enqueue(move || {
                h.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            hits.load(Ordering::Relaxed) == 1
        }));
        fiber.dispose();
        fiber.join();
    }

    #[test]
    fn pre_start_tasks_run_before_post_start_tasks() {
        let fiber = ThreadFiber::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for n in 0..5 {
            let log = Arc::clone(&log);
            fiber.enqueue(move || log.lock().push(n)).unwrap();
        }
        fiber.start().unwrap();
        for n in 5..8 {
            let log = Arc::clone(&log);
            fiber.enqueue(move || log.lock().push(n)).unwrap();
        }
        assert!(wait_until(Duration::from_secs(2), || log.lock().len() == 8));
        assert_eq!(*log.lock(), (0..8).collect::<Vec<_>>());
        fiber.dispose();
        fiber.join();
    }

    #[test]
    fn double_start_errors() {
        let fiber = ThreadFiber::new();
        fiber.start().unwrap();
        assert_eq!(fiber.start(), Err(LifecycleError::AlreadyStarted));
        fiber.dispose();
        fiber.join();
    }

    #[test]
    fn start_after_dispose_errors() {
        let fiber = ThreadFiber::new();
        fiber.dispose();
        assert_eq!(fiber.start(), Err(LifecycleError::Disposed));
    }

    #[test]
    fn enqueue_after_dispose_is_silently_dropped() {
        let fiber = ThreadFiber::new();
        fiber.start().unwrap();
        fiber.dispose();
        fiber.join();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        fiber
            .enqueue(move || {
                h.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn scheduled_work_runs_on_the_fiber() {
        let fiber = ThreadFiber::new();
        fiber.start().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        fiber.schedule(
            move || {
                h.fetch_add(1, Ordering::Relaxed);
            },
            Duration::from_millis(20),
        );
        assert!(wait_until(Duration::from_secs(2), || {
            hits.load(Ordering::Relaxed) == 1
        }));
        fiber.dispose();
        fiber.join();
    }

    #[test]
    fn dispose_cancels_pending_timers() {
        let fiber = ThreadFiber::new();
        fiber.start().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        fiber.schedule(
            move || {
                h.fetch_add(1, Ordering::Relaxed);
            },
            Duration::from_millis(100),
        );
        fiber.dispose();
        fiber.join();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn interval_schedule_repeats() {
        let fiber = ThreadFiber::new();
        fiber.start().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        fiber.schedule_on_interval(
            move || {
                h.fetch_add(1, Ordering::Relaxed);
            },
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        assert!(wait_until(Duration::from_secs(2), || {
            hits.load(Ordering::Relaxed) >= 3
        }));
        fiber.dispose();
        fiber.join();
    }

    #[test]
    fn named_thread_is_used() {
        let fiber = ThreadFiber::builder().name("worker-under-test").build();
        fiber.start().unwrap();
        let name = Arc::new(parking_lot::Mutex::new(String::new()));
        let n = Arc::clone(&name);
        fiber
            .enqueue(move || {
                if let Some(current) = thread::current().name() {
                    *n.lock() = current.to_string();
                }
            })
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            !name.lock().is_empty()
        }));
        assert_eq!(*name.lock(), "worker-under-test");
        fiber.dispose();
        fiber.join();
    }
}
