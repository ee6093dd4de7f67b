//! Direct per-message delivery onto a fiber.

use std::sync::Arc;

use crate::fiber::Fiber;

use super::{Filter, Subscriber};

/// Forwards each published message straight onto the target fiber: one
/// message in, one callback invocation out, no batching.
pub struct ChannelSubscriber<T> {
    fiber: Arc<dyn Fiber>,
    handler: Arc<dyn Fn(T) + Send + Sync>,
    filter: Option<Filter<T>>,
}

impl<T: Send + 'static> ChannelSubscriber<T> {
    /// Creates a direct subscriber delivering to `handler` on `fiber`.
    pub fn new<H>(fiber: Arc<dyn Fiber>, handler: H) -> Self
    where
        H: Fn(T) + Send + Sync + 'static,
    {
        Self {
            fiber,
            handler: Arc::new(handler),
            filter: None,
        }
    }

    /// Drops messages failing `filter` on the producer thread, before any
    /// enqueue.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    fn passes(&self, msg: &T) -> bool {
        self.filter.as_ref().map_or(true, |f| f(msg))
    }
}

impl<T: Send + 'static> Subscriber<T> for ChannelSubscriber<T> {
    fn receive(&self, msg: T) {
        if !self.passes(&msg) {
            return;
        }
        let handler = Arc::clone(&self.handler);
        if let Err(err) = self.fiber.enqueue_task(Box::new(move || handler(msg))) {
            tracing::warn!(error = %err, "message dropped, fiber mailbox rejected it");
        }
    }
}
