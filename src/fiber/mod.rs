//! Fibers: logical single-threaded execution contexts.
//!
//! A fiber owns an action queue, a scheduler, and a subscription registry.
//! Producers on arbitrary threads hand it work; the fiber executes that work
//! one batch at a time on exactly one consumer context: a dedicated OS
//! thread ([`ThreadFiber`]), a shared worker pool with at most one active
//! work item per fiber ([`PoolFiber`]), or the calling thread itself for
//! deterministic tests ([`StubFiber`]).
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start()──► Running ──dispose()──► Stopped
//! ```
//!
//! While `Created`, enqueued tasks buffer locally so work submitted before
//! `start` is not lost; `start` flushes the buffer ahead of anything
//! enqueued later and happens exactly once. While `Stopped`, enqueue is a
//! silent best-effort discard: a producer cannot always know its consumer
//! has shut down. Disposal cascades in a fixed order: cancel timers, drop
//! channel subscriptions, stop the queue.

mod pool_fiber;
mod registry;
mod stub_fiber;
mod thread_fiber;

pub use pool_fiber::PoolFiber;
pub use registry::SubscriptionRegistry;
pub use stub_fiber::StubFiber;
pub use thread_fiber::{ThreadFiber, ThreadFiberBuilder};

use std::sync::Arc;
use std::time::Duration;

use crate::channel::Subscription;
use crate::error::{EnqueueError, LifecycleError};
use crate::queue::Task;
use crate::timer::TimerHandle;

/// Anything that accepts tasks for execution on its own context.
///
/// This is the seam the scheduler and the channel subscribers talk to; they
/// never reach into a queue directly.
pub trait ExecutionContext: Send + Sync {
    /// Hands a task to this context.
    ///
    /// A stopped context discards the task and reports success; the caller
    /// cannot act on the race anyway.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::QueueFull`] when a bounded mailbox rejects
    /// the task under its admission policy.
    fn enqueue_task(&self, task: Task) -> Result<(), EnqueueError>;
}

/// Closure-friendly sugar over [`ExecutionContext`].
pub trait ExecutionContextExt: ExecutionContext {
    /// Boxes and enqueues a closure.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutionContext::enqueue_task`].
    fn enqueue<F>(&self, f: F) -> Result<(), EnqueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_task(Box::new(f))
    }
}

impl<T: ExecutionContext + ?Sized> ExecutionContextExt for T {}

/// The full fiber surface: enqueue, schedule, lifecycle, subscriptions.
pub trait Fiber: ExecutionContext {
    /// Transitions `Created → Running`, flushing tasks buffered before the
    /// start.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::AlreadyStarted`] on a second start
    /// - [`LifecycleError::Disposed`] after `dispose`
    fn start(&self) -> Result<(), LifecycleError>;

    /// Tears the fiber down: cancels its timers, drops its channel
    /// subscriptions, stops its queue. Idempotent.
    fn dispose(&self);

    /// Schedules `task` to run on this fiber after `delay`.
    fn schedule_task(&self, task: Task, delay: Duration) -> TimerHandle;

    /// Schedules `action` to run on this fiber after `first`, then every
    /// `interval`.
    fn schedule_task_on_interval(
        &self,
        action: Arc<dyn Fn() + Send + Sync>,
        first: Duration,
        interval: Duration,
    ) -> TimerHandle;

    /// Registers an unsubscribe handle to be disposed with this fiber.
    fn register_subscription(&self, subscription: Subscription);

    /// Number of live registered subscriptions.
    fn subscription_count(&self) -> usize;
}

/// Closure-friendly sugar over [`Fiber`].
pub trait FiberExt: Fiber {
    /// Boxes and schedules a closure.
    fn schedule<F>(&self, f: F, delay: Duration) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_task(Box::new(f), delay)
    }

    /// Wraps and schedules a recurring closure.
    fn schedule_on_interval<F>(&self, f: F, first: Duration, interval: Duration) -> TimerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_task_on_interval(Arc::new(f), first, interval)
    }
}

impl<T: Fiber + ?Sized> FiberExt for T {}

/// Shared lifecycle state machine for the thread- and pool-backed fibers.
pub(crate) enum Lifecycle {
    Created { backlog: Vec<Task> },
    Running,
    Stopped,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self::Created {
            backlog: Vec::new(),
        }
    }
}
