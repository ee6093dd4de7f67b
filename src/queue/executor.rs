//! Batch execution policies for drained tasks.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::Task;

/// Invokes a drained batch of tasks sequentially.
///
/// The policy for user-callback failures lives here, injected at fiber
/// construction rather than hooked up through mutable global state:
/// [`DefaultExecutor`] lets panics unwind the consumer thread,
/// [`PanicTrapExecutor`] routes the payload to a handler and keeps going.
pub trait BatchExecutor: Send + Sync {
    /// Executes and removes every task in `batch`, in order.
    fn execute_batch(&self, batch: &mut Vec<Task>);

    /// Stops executing further tasks; remaining and future batch contents
    /// are discarded unexecuted. Used to silence work during teardown.
    fn disable(&self) {}
}

/// Sequential executor that lets task panics propagate.
///
/// A panic unwinds out of the consumer loop and takes the fiber's thread
/// down with it, surfacing programmer errors instead of hiding them. The
/// `enabled` gate silences any batch still in flight after shutdown.
pub struct DefaultExecutor {
    enabled: AtomicBool,
}

impl DefaultExecutor {
    /// Creates an enabled executor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    /// Returns `true` while the executor still runs tasks.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Default for DefaultExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchExecutor for DefaultExecutor {
    fn execute_batch(&self, batch: &mut Vec<Task>) {
        for task in batch.drain(..) {
            if !self.enabled.load(Ordering::Acquire) {
                return;
            }
            task();
        }
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }
}

/// Receives panic payloads from a [`PanicTrapExecutor`].
pub type PanicHandler = dyn Fn(Box<dyn Any + Send>) + Send + Sync;

/// Executor that traps per-task panics and keeps the consumer loop alive.
///
/// Each task runs under `catch_unwind`; a panic payload is handed to the
/// injected handler and the rest of the batch still executes.
pub struct PanicTrapExecutor {
    enabled: AtomicBool,
    handler: Arc<PanicHandler>,
}

impl PanicTrapExecutor {
    /// Creates an executor that reports panics to `handler`.
    #[must_use]
    pub fn new(handler: Arc<PanicHandler>) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            handler,
        }
    }
}

impl BatchExecutor for PanicTrapExecutor {
    fn execute_batch(&self, batch: &mut Vec<Task>) {
        for task in batch.drain(..) {
            if !self.enabled.load(Ordering::Acquire) {
                return;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                tracing::error!("task panicked; routing payload to handler");
                (self.handler)(payload);
            }
        }
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn batch_of(counter: &Arc<AtomicUsize>, n: usize) -> Vec<Task> {
        (0..n)
            .map(|_| {
                let c = Arc::clone(counter);
                let task: Task = Box::new(move || {
                    c.fetch_add(1, Ordering::Relaxed);
                });
                task
            })
            .collect()
    }

    #[test]
    fn default_executor_runs_batch_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut batch = batch_of(&counter, 5);
        DefaultExecutor::new().execute_batch(&mut batch);
        assert!(batch.is_empty());
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn disabled_executor_discards_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut batch = batch_of(&counter, 5);
        let executor = DefaultExecutor::new();
        executor.disable();
        executor.execute_batch(&mut batch);
        assert!(batch.is_empty());
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn trap_executor_survives_a_panicking_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let trapped = Arc::new(AtomicUsize::new(0));

        let t = Arc::clone(&trapped);
        let executor = PanicTrapExecutor::new(Arc::new(move |_payload| {
            t.fetch_add(1, Ordering::Relaxed);
        }));

        let mut batch: Vec<Task> = Vec::new();
        let c = Arc::clone(&counter);
        batch.push(Box::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        }));
        batch.push(Box::new(|| panic!("intentional panic")));
        let c = Arc::clone(&counter);
        batch.push(Box::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        }));

        executor.execute_batch(&mut batch);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
        assert_eq!(trapped.load(Ordering::Relaxed), 1);
    }
}
