//! Per-key coalesced batch delivery.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::fiber::Fiber;

use super::{Filter, Subscriber};

struct KeyedState<K, T> {
    fiber: Arc<dyn Fiber>,
    interval: Duration,
    key_of: Box<dyn Fn(&T) -> K + Send + Sync>,
    handler: Box<dyn Fn(HashMap<K, T>) + Send + Sync>,
    buffer: Mutex<Option<HashMap<K, T>>>,
}

impl<K, T> KeyedState<K, T>
where
    K: Eq + Hash + Send + 'static,
    T: Send + 'static,
{
    fn flush(state: &Arc<Self>) {
        let batch = state.buffer.lock().take();
        if let Some(batch) = batch {
            if !batch.is_empty() {
                (state.handler)(batch);
            }
        }
    }
}

/// Buffers messages into a map keyed by a resolver function; a later
/// message with a duplicate key overwrites the earlier one, so only the
/// most recent value per key survives to the flush.
pub struct KeyedBatchSubscriber<K, T> {
    state: Arc<KeyedState<K, T>>,
    filter: Option<Filter<T>>,
}

impl<K, T> KeyedBatchSubscriber<K, T>
where
    K: Eq + Hash + Send + 'static,
    T: Send + 'static,
{
    /// Creates a keyed-batch subscriber delivering to `handler` on `fiber`.
    pub fn new<KF, H>(fiber: Arc<dyn Fiber>, key_of: KF, handler: H, interval: Duration) -> Self
    where
        KF: Fn(&T) -> K + Send + Sync + 'static,
        H: Fn(HashMap<K, T>) + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(KeyedState {
                fiber,
                interval,
                key_of: Box::new(key_of),
                handler: Box::new(handler),
                buffer: Mutex::new(None),
            }),
            filter: None,
        }
    }

    /// Drops messages failing `filter` before they enter the map.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<K, T> Subscriber<T> for KeyedBatchSubscriber<K, T>
where
    K: Eq + Hash + Send + 'static,
    T: Send + 'static,
{
    fn receive(&self, msg: T) {
        if let Some(filter) = &self.filter {
            if !filter(&msg) {
                return;
            }
        }
        let key = (self.state.key_of)(&msg);
        let start_cycle = {
            let mut buffer = self.state.buffer.lock();
            match &mut *buffer {
                Some(map) => {
                    map.insert(key, msg);
                    false
                }
                None => {
                    let mut map = HashMap::new();
                    map.insert(key, msg);
                    *buffer = Some(map);
                    true
                }
            }
        };
        if start_cycle {
            let state = Arc::clone(&self.state);
            self.state
                .fiber
                .schedule_task(Box::new(move || KeyedState::flush(&state)), self.state.interval);
        }
    }
}
