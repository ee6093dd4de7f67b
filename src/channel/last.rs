//! Most-recent-value delivery.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::fiber::Fiber;

use super::{Filter, Subscriber};

struct LastSlot<T> {
    value: Option<T>,
    /// At most one flush is ever scheduled per accumulation window.
    flush_pending: bool,
}

struct LastState<T> {
    fiber: Arc<dyn Fiber>,
    interval: Duration,
    handler: Box<dyn Fn(T) + Send + Sync>,
    slot: Mutex<LastSlot<T>>,
}

impl<T: Send + 'static> LastState<T> {
    fn flush(state: &Arc<Self>) {
        let value = {
            let mut slot = state.slot.lock();
            slot.flush_pending = false;
            slot.value.take()
        };
        if let Some(value) = value {
            (state.handler)(value);
        }
    }
}

/// Keeps a single pending slot; every new message before the next flush
/// overwrites it, and the flush delivers exactly the most recent value, or
/// nothing if none arrived.
pub struct LastSubscriber<T> {
    state: Arc<LastState<T>>,
    filter: Option<Filter<T>>,
}

impl<T: Send + 'static> LastSubscriber<T> {
    /// Creates a last-value subscriber delivering to `handler` on `fiber`.
    pub fn new<H>(fiber: Arc<dyn Fiber>, handler: H, interval: Duration) -> Self
    where
        H: Fn(T) + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(LastState {
                fiber,
                interval,
                handler: Box::new(handler),
                slot: Mutex::new(LastSlot {
                    value: None,
                    flush_pending: false,
                }),
            }),
            filter: None,
        }
    }

    /// Drops messages failing `filter` before they reach the slot.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<T: Send + 'static> Subscriber<T> for LastSubscriber<T> {
    fn receive(&self, msg: T) {
        if let Some(filter) = &self.filter {
            if !filter(&msg) {
                return;
            }
        }
        let start_window = {
            let mut slot = self.state.slot.lock();
            slot.value = Some(msg);
            if slot.flush_pending {
                false
            } else {
                slot.flush_pending = true;
                true
            }
        };
        if start_window {
            let state = Arc::clone(&self.state);
            self.state
                .fiber
                .schedule_task(Box::new(move || LastState::flush(&state)), self.state.interval);
        }
    }
}
