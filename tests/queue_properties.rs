//! Property tests for queue ordering and exactly-once execution.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use strand::{ActionQueue, QueueSettings, Task, TaskQueue};

proptest! {
    /// Any enqueue sequence drains in FIFO order with every task executed
    /// exactly once, regardless of how the drains interleave.
    #[test]
    fn fifo_order_and_exactly_once(values in prop::collection::vec(any::<u16>(), 0..200)) {
        let queue = ActionQueue::unbounded();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let executions = Arc::new(AtomicUsize::new(0));

        for value in &values {
            let value = *value;
            let log = Arc::clone(&log);
            let executions = Arc::clone(&executions);
            let task: Task = Box::new(move || {
                log.lock().push(value);
                executions.fetch_add(1, Ordering::Relaxed);
            });
            queue.enqueue(task).unwrap();
        }

        let mut batch = Vec::new();
        while !queue.is_empty() {
            prop_assert!(queue.drain(&mut batch));
            for task in batch.drain(..) {
                task();
            }
        }

        prop_assert_eq!(&*log.lock(), &values);
        prop_assert_eq!(executions.load(Ordering::Relaxed), values.len());
    }

    /// A bounded fail-fast queue admits exactly `depth` tasks and reports
    /// the observed depth on the first rejected enqueue.
    #[test]
    fn bounded_admission_is_exact(depth in 1usize..64) {
        let queue = ActionQueue::new(QueueSettings::bounded(depth));
        for _ in 0..depth {
            queue.enqueue(Box::new(|| {})).unwrap();
        }
        let err = queue.enqueue(Box::new(|| {})).unwrap_err();
        prop_assert_eq!(err, strand::EnqueueError::QueueFull { depth });
        prop_assert_eq!(queue.len(), depth);
    }
}
