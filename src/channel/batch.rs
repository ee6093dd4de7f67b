//! Ordered batch delivery with a per-cycle flush.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::fiber::Fiber;

use super::{Filter, Subscriber};

struct BatchState<T> {
    fiber: Arc<dyn Fiber>,
    interval: Duration,
    handler: Box<dyn Fn(Vec<T>) + Send + Sync>,
    /// `None` between cycles; created by the first message of a cycle,
    /// which also schedules the single flush for that cycle.
    buffer: Mutex<Option<Vec<T>>>,
}

impl<T: Send + 'static> BatchState<T> {
    fn flush(state: &Arc<Self>) {
        let batch = state.buffer.lock().take();
        if let Some(batch) = batch {
            if !batch.is_empty() {
                (state.handler)(batch);
            }
        }
    }
}

/// Accumulates published messages in arrival order and delivers them as one
/// `Vec<T>` per flush.
///
/// The first message since the last flush creates the buffer and schedules
/// exactly one flush `interval` later on the target fiber; every message,
/// the first included, appends. A zero interval still routes through the
/// scheduler, coalescing only whatever arrives before the flush runs.
pub struct BatchSubscriber<T> {
    state: Arc<BatchState<T>>,
    filter: Option<Filter<T>>,
}

impl<T: Send + 'static> BatchSubscriber<T> {
    /// Creates a batch subscriber delivering to `handler` on `fiber`.
    pub fn new<H>(fiber: Arc<dyn Fiber>, handler: H, interval: Duration) -> Self
    where
        H: Fn(Vec<T>) + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(BatchState {
                fiber,
                interval,
                handler: Box::new(handler),
                buffer: Mutex::new(None),
            }),
            filter: None,
        }
    }

    /// Drops messages failing `filter` before they enter the buffer.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<T: Send + 'static> Subscriber<T> for BatchSubscriber<T> {
    fn receive(&self, msg: T) {
        if let Some(filter) = &self.filter {
            if !filter(&msg) {
                return;
            }
        }
        let start_cycle = {
            let mut buffer = self.state.buffer.lock();
            match &mut *buffer {
                Some(buf) => {
                    buf.push(msg);
                    false
                }
                None => {
                    *buffer = Some(vec![msg]);
                    true
                }
            }
        };
        if start_cycle {
            let state = Arc::clone(&self.state);
            self.state
                .fiber
                .schedule_task(Box::new(move || BatchState::flush(&state)), self.state.interval);
        }
    }
}
