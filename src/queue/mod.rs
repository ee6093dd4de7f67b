//! Action queues: thread-safe mailboxes of pending callbacks.
//!
//! A queue owns the producer/consumer synchronization for one consumer
//! context: bounded-capacity admission with wait-then-fail semantics on the
//! producer side, and batch draining on the consumer side. Cross-thread
//! handoff is solely through enqueued closures; the queue's internal state is
//! guarded by its own private lock and is never reached through another
//! component's lock.

mod action_queue;
mod busy_wait;
mod executor;
mod pending;

pub use action_queue::ActionQueue;
pub use busy_wait::BusyWaitQueue;
pub use executor::{BatchExecutor, DefaultExecutor, PanicHandler, PanicTrapExecutor};
pub use pending::PendingAction;

use crate::error::EnqueueError;

/// A unit of work handed across threads.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The mailbox contract shared by the blocking and busy-wait queues.
///
/// `run` drives batches through an executor until the queue is stopped and
/// empty. `stop` wakes every blocked producer and consumer; a blocked caller
/// observes the stop and returns or fails rather than hanging.
pub trait TaskQueue: Send + Sync {
    /// Appends a task at the tail.
    ///
    /// # Errors
    ///
    /// - [`EnqueueError::QueueFull`] if a bounded queue cannot admit the task
    ///   within its configured wait policy
    /// - [`EnqueueError::Stopped`] if the queue has been stopped
    fn enqueue(&self, task: Task) -> Result<(), EnqueueError>;

    /// Blocks until at least one task is present or the queue is stopped,
    /// then moves the whole pending batch into `into` (which must be empty).
    ///
    /// Returns `false` once the queue is stopped and drained; the consumer
    /// loop should exit. The caller's buffer is the second half of a
    /// ping-pong pair: the swap is O(1) and reuses its capacity.
    fn drain(&self, into: &mut Vec<Task>) -> bool;

    /// Stops the queue and wakes all blocked producers and consumers.
    fn stop(&self);

    /// Number of tasks currently queued.
    fn len(&self) -> usize;

    /// Returns `true` if no tasks are queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumer loop: drain and execute batches until stopped and empty.
    fn run(&self, executor: &dyn BatchExecutor) {
        let mut batch = Vec::new();
        while self.drain(&mut batch) {
            executor.execute_batch(&mut batch);
            batch.clear();
        }
    }
}
