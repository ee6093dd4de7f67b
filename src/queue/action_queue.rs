//! Blocking FIFO mailbox with bounded admission.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::config::QueueSettings;
use crate::error::EnqueueError;

use super::{Task, TaskQueue};

struct QueueInner {
    tasks: Vec<Task>,
    running: bool,
}

/// Thread-safe FIFO mailbox of pending callbacks.
///
/// Producers append under the queue lock; when a capacity limit is set,
/// admission blocks up to the configured wait and then fails with
/// [`EnqueueError::QueueFull`]. The consumer drains the whole pending batch
/// in one O(1) buffer swap. Once stopped, no new task is admitted and every
/// blocked producer and consumer is released.
pub struct ActionQueue {
    inner: Mutex<QueueInner>,
    task_ready: Condvar,
    space_available: Condvar,
    settings: QueueSettings,
}

impl ActionQueue {
    /// Creates a queue with the given admission settings.
    #[must_use]
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tasks: Vec::new(),
                running: true,
            }),
            task_ready: Condvar::new(),
            space_available: Condvar::new(),
            settings,
        }
    }

    /// Creates an unbounded queue.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(QueueSettings::unbounded())
    }

    /// Blocks until capacity frees or the admission wait elapses.
    fn wait_for_capacity<'a>(
        &'a self,
        mut inner: MutexGuard<'a, QueueInner>,
        cap: usize,
    ) -> Result<MutexGuard<'a, QueueInner>, EnqueueError> {
        if self.settings.max_enqueue_wait.is_zero() {
            let depth = inner.tasks.len();
            tracing::warn!(depth, "queue full, rejecting task");
            return Err(EnqueueError::QueueFull { depth });
        }
        let deadline = Instant::now() + self.settings.max_enqueue_wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let depth = inner.tasks.len();
                tracing::warn!(depth, "queue still full after admission wait, rejecting task");
                return Err(EnqueueError::QueueFull { depth });
            }
            let (guard, _) = self
                .space_available
                .wait_timeout(inner, remaining)
                .expect("action queue lock poisoned");
            inner = guard;
            if !inner.running {
                return Err(EnqueueError::Stopped);
            }
            if inner.tasks.len() < cap {
                return Ok(inner);
            }
        }
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl TaskQueue for ActionQueue {
    fn enqueue(&self, task: Task) -> Result<(), EnqueueError> {
        let mut inner = self.inner.lock().expect("action queue lock poisoned");
        if !inner.running {
            return Err(EnqueueError::Stopped);
        }
        if let Some(cap) = self.settings.max_depth {
            if inner.tasks.len() >= cap {
                inner = self.wait_for_capacity(inner, cap)?;
            }
        }
        inner.tasks.push(task);
        self.task_ready.notify_one();
        Ok(())
    }

    fn drain(&self, into: &mut Vec<Task>) -> bool {
        debug_assert!(into.is_empty(), "drain target must be empty");
        let mut inner = self.inner.lock().expect("action queue lock poisoned");
        while inner.tasks.is_empty() {
            if !inner.running {
                return false;
            }
            inner = self
                .task_ready
                .wait(inner)
                .expect("action queue lock poisoned");
        }
        std::mem::swap(&mut inner.tasks, into);
        self.space_available.notify_all();
        true
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().expect("action queue lock poisoned");
        inner.running = false;
        self.task_ready.notify_all();
        self.space_available.notify_all();
    }

    fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("action queue lock poisoned")
            .tasks
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DefaultExecutor;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn counting_task(log: &Arc<parking_lot::Mutex<Vec<usize>>>, n: usize) -> Task {
        let log = Arc::clone(log);
        Box::new(move || log.lock().push(n))
    }

    #[test]
    fn drains_in_fifo_order() {
        let queue = ActionQueue::unbounded();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for n in 0..10 {
            queue.enqueue(counting_task(&log, n)).unwrap();
        }
        let mut batch = Vec::new();
        assert!(queue.drain(&mut batch));
        assert_eq!(batch.len(), 10);
        for task in batch.drain(..) {
            task();
        }
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn bounded_fail_fast_reports_depth() {
        let queue = ActionQueue::new(QueueSettings::bounded(3));
        for _ in 0..3 {
            queue.enqueue(Box::new(|| {})).unwrap();
        }
        let err = queue.enqueue(Box::new(|| {})).unwrap_err();
        assert_eq!(err, EnqueueError::QueueFull { depth: 3 });
    }

    #[test]
    fn admission_wait_elapses_then_fails() {
        let queue = ActionQueue::new(
            QueueSettings::bounded(1).with_max_enqueue_wait(Duration::from_millis(50)),
        );
        queue.enqueue(Box::new(|| {})).unwrap();
        let start = Instant::now();
        let err = queue.enqueue(Box::new(|| {})).unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(err, EnqueueError::QueueFull { depth: 1 });
    }

    #[test]
    fn admission_wait_succeeds_when_consumer_drains() {
        let queue = Arc::new(ActionQueue::new(
            QueueSettings::bounded(1).with_max_enqueue_wait(Duration::from_secs(5)),
        ));
        queue.enqueue(Box::new(|| {})).unwrap();

        let q = Arc::clone(&queue);
        let drainer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let mut batch = Vec::new();
            assert!(q.drain(&mut batch));
        });

        queue.enqueue(Box::new(|| {})).unwrap();
        drainer.join().unwrap();
    }

    #[test]
    fn stop_releases_blocked_producer() {
        let queue = Arc::new(ActionQueue::new(
            QueueSettings::bounded(1).with_max_enqueue_wait(Duration::from_secs(30)),
        ));
        queue.enqueue(Box::new(|| {})).unwrap();

        let q = Arc::clone(&queue);
        let producer = thread::spawn(move || q.enqueue(Box::new(|| {})));

        thread::sleep(Duration::from_millis(30));
        queue.stop();
        assert_eq!(producer.join().unwrap(), Err(EnqueueError::Stopped));
    }

    #[test]
    fn stop_releases_blocked_consumer() {
        let queue = Arc::new(ActionQueue::unbounded());
        let q = Arc::clone(&queue);
        let consumer = thread::spawn(move || {
            let mut batch = Vec::new();
            q.drain(&mut batch)
        });
        thread::sleep(Duration::from_millis(30));
        queue.stop();
        assert!(!consumer.join().unwrap());
    }

    #[test]
    fn run_executes_everything_then_exits_on_stop() {
        let queue = Arc::new(ActionQueue::unbounded());
        let executed = Arc::new(AtomicUsize::new(0));
        for _ in 0..25 {
            let e = Arc::clone(&executed);
            queue
                .enqueue(Box::new(move || {
                    e.fetch_add(1, Ordering::Relaxed);
                }))
                .unwrap();
        }
        let q = Arc::clone(&queue);
        let consumer = thread::spawn(move || q.run(&DefaultExecutor::new()));
        thread::sleep(Duration::from_millis(50));
        queue.stop();
        consumer.join().unwrap();
        assert_eq!(executed.load(Ordering::Relaxed), 25);
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_after_stop_is_rejected() {
        let queue = ActionQueue::unbounded();
        queue.stop();
        let hit = Arc::new(AtomicBool::new(false));
        let h = Arc::clone(&hit);
        let err = queue
            .enqueue(Box::new(move || h.store(true, Ordering::Relaxed)))
            .unwrap_err();
        assert_eq!(err, EnqueueError::Stopped);
        assert!(!hit.load(Ordering::Relaxed));
    }
}
