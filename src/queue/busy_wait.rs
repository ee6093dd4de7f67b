//! Latency-focused mailbox that spins before parking.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::error::EnqueueError;

use super::{Task, TaskQueue};

struct BusyInner {
    tasks: Vec<Task>,
    running: bool,
}

/// Unbounded mailbox whose consumer spins on the queue instead of parking
/// on a condition variable, trading CPU for dequeue latency.
///
/// The consumer polls in three phases per empty observation: a spin-loop
/// hint for `spins_before_yield` iterations, then a `yield_now`, then a 1ms
/// sleep. Admission control is deliberately absent; pair it with a bounded
/// [`ActionQueue`](super::ActionQueue) when backpressure matters.
pub struct BusyWaitQueue {
    inner: Mutex<BusyInner>,
    spins_before_yield: u32,
}

impl BusyWaitQueue {
    const PARK_INTERVAL: Duration = Duration::from_millis(1);

    /// Creates a queue that spins `spins_before_yield` times per empty
    /// observation before starting to yield.
    #[must_use]
    pub fn new(spins_before_yield: u32) -> Self {
        Self {
            inner: Mutex::new(BusyInner {
                tasks: Vec::new(),
                running: true,
            }),
            spins_before_yield,
        }
    }
}

impl Default for BusyWaitQueue {
    fn default() -> Self {
        Self::new(100)
    }
}

impl TaskQueue for BusyWaitQueue {
    fn enqueue(&self, task: Task) -> Result<(), EnqueueError> {
        let mut inner = self.inner.lock().expect("busy-wait queue lock poisoned");
        if !inner.running {
            return Err(EnqueueError::Stopped);
        }
        inner.tasks.push(task);
        Ok(())
    }

    fn drain(&self, into: &mut Vec<Task>) -> bool {
        debug_assert!(into.is_empty(), "drain target must be empty");
        let mut spins: u32 = 0;
        loop {
            {
                let mut inner = self.inner.lock().expect("busy-wait queue lock poisoned");
                if !inner.tasks.is_empty() {
                    std::mem::swap(&mut inner.tasks, into);
                    return true;
                }
                if !inner.running {
                    return false;
                }
            }
            if spins < self.spins_before_yield {
                spins += 1;
                std::hint::spin_loop();
            } else if spins == self.spins_before_yield {
                spins += 1;
                thread::yield_now();
            } else {
                thread::sleep(Self::PARK_INTERVAL);
            }
        }
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().expect("busy-wait queue lock poisoned");
        inner.running = false;
    }

    fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("busy-wait queue lock poisoned")
            .tasks
            .len()
    }
}
