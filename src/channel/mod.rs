//! Typed multicast channels with per-subscriber delivery policy.
//!
//! A [`Channel`] is a thread-safe publish point that is not itself bound to
//! any thread: `publish` synchronously invokes every registered
//! producer-thread callback on the caller's thread, and each subscription
//! decides independently how the message crosses to its consumer fiber:
//! immediately ([`ChannelSubscriber`]), coalesced into an ordered batch
//! ([`BatchSubscriber`]), coalesced per key ([`KeyedBatchSubscriber`]), or
//! collapsed to the most recent value ([`LastSubscriber`]).
//!
//! There is no ordering guarantee across independent subscribers, and none
//! across producer threads racing to publish; each subscription variant
//! documents its own internal ordering discipline.

mod batch;
mod keyed;
mod last;
mod request;
mod subscriber;

pub use batch::BatchSubscriber;
pub use keyed::KeyedBatchSubscriber;
pub use last::LastSubscriber;
pub use request::{ReplyReceiver, Request, RequestChannel};
pub use subscriber::ChannelSubscriber;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::fiber::Fiber;

/// Producer-thread predicate applied before a message enters any buffer.
pub type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// One subscription's producer-thread entry point.
///
/// `receive` runs on whichever thread called `publish`; implementations
/// decide whether and when to cross onto a consumer fiber.
pub trait Subscriber<T>: Send + Sync {
    /// Accepts one published message.
    fn receive(&self, msg: T);
}

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct ChannelCore<T> {
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
}

/// Typed multicast publish point.
///
/// Cloning a channel is cheap and shares the subscriber set. Callbacks are
/// kept in an explicit id-keyed list; removal is by handle identity, so
/// structurally equal closures can never unsubscribe each other.
pub struct Channel<T> {
    core: Arc<ChannelCore<T>>,
}

impl<T> Channel<T> {
    /// Creates a channel with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(ChannelCore {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.subscribers.lock().len()
    }

    /// Removes every subscription at once.
    pub fn clear_subscribers(&self) {
        self.core.subscribers.lock().clear();
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Clone + Send + 'static> Channel<T> {
    /// Publishes `msg` to every subscriber, synchronously, on the calling
    /// thread. Returns `true` if at least one subscriber existed.
    ///
    /// The subscriber list is snapshotted first; no channel lock is held
    /// while callbacks run.
    pub fn publish(&self, msg: T) -> bool {
        let snapshot: Vec<Callback<T>> = {
            let subscribers = self.core.subscribers.lock();
            subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        if snapshot.is_empty() {
            return false;
        }
        for callback in &snapshot {
            callback(msg.clone());
        }
        true
    }

    /// Registers a raw producer-thread callback.
    ///
    /// This is the primitive the fiber-targeting subscriptions build on;
    /// the callback runs on whichever thread publishes.
    pub fn subscribe_on_producer_thread(&self, callback: Callback<T>) -> Subscription {
        let id = self.core.next_id.fetch_add(1, Ordering::Relaxed);
        self.core.subscribers.lock().push((id, callback));
        let core = Arc::downgrade(&self.core);
        Subscription::new(move || {
            if let Some(core) = core.upgrade() {
                core.subscribers.lock().retain(|(sub_id, _)| *sub_id != id);
            }
        })
    }

    /// Attaches a prebuilt subscriber (typically one of the variants with a
    /// filter applied) and registers the unsubscriber with `fiber`.
    pub fn subscribe_with<F>(
        &self,
        fiber: &Arc<F>,
        subscriber: Arc<dyn Subscriber<T>>,
    ) -> Subscription
    where
        F: Fiber + 'static,
    {
        let subscription =
            self.subscribe_on_producer_thread(Arc::new(move |msg| subscriber.receive(msg)));
        fiber.register_subscription(subscription.clone());
        subscription
    }

    /// Subscribes `handler` to run on `fiber`, one invocation per message.
    pub fn subscribe<F, H>(&self, fiber: &Arc<F>, handler: H) -> Subscription
    where
        F: Fiber + 'static,
        H: Fn(T) + Send + Sync + 'static,
    {
        let target: Arc<dyn Fiber> = fiber.clone();
        self.subscribe_with(fiber, Arc::new(ChannelSubscriber::new(target, handler)))
    }

    /// Subscribes `handler` to receive ordered batches, flushed `interval`
    /// after the first message of each accumulation cycle.
    pub fn subscribe_to_batch<F, H>(
        &self,
        fiber: &Arc<F>,
        handler: H,
        interval: Duration,
    ) -> Subscription
    where
        F: Fiber + 'static,
        H: Fn(Vec<T>) + Send + Sync + 'static,
    {
        let target: Arc<dyn Fiber> = fiber.clone();
        self.subscribe_with(fiber, Arc::new(BatchSubscriber::new(target, handler, interval)))
    }

    /// Subscribes `handler` to receive per-key coalesced batches; a later
    /// message with a duplicate key overwrites the earlier one before the
    /// flush.
    pub fn subscribe_to_keyed_batch<F, K, KF, H>(
        &self,
        fiber: &Arc<F>,
        key_of: KF,
        handler: H,
        interval: Duration,
    ) -> Subscription
    where
        F: Fiber + 'static,
        K: Eq + Hash + Send + 'static,
        KF: Fn(&T) -> K + Send + Sync + 'static,
        H: Fn(HashMap<K, T>) + Send + Sync + 'static,
    {
        let target: Arc<dyn Fiber> = fiber.clone();
        self.subscribe_with(
            fiber,
            Arc::new(KeyedBatchSubscriber::new(target, key_of, handler, interval)),
        )
    }

    /// Subscribes `handler` to receive only the most recent message per
    /// flush window.
    pub fn subscribe_to_last<F, H>(
        &self,
        fiber: &Arc<F>,
        handler: H,
        interval: Duration,
    ) -> Subscription
    where
        F: Fiber + 'static,
        H: Fn(T) + Send + Sync + 'static,
    {
        let target: Arc<dyn Fiber> = fiber.clone();
        self.subscribe_with(fiber, Arc::new(LastSubscriber::new(target, handler, interval)))
    }
}

struct SubscriptionInner {
    disposed: AtomicBool,
    unsubscribe: Box<dyn Fn() + Send + Sync>,
}

/// Unsubscribe handle for one channel subscription.
///
/// Clones share the underlying registration; unsubscribing any clone
/// removes the subscription, and doing so twice is a safe no-op. The handle
/// holds only a weak reference to the channel, so it never extends the
/// channel's lifetime.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    fn new(unsubscribe: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                disposed: AtomicBool::new(false),
                unsubscribe: Box::new(unsubscribe),
            }),
        }
    }

    /// Removes the subscription from its channel. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.inner.disposed.swap(true, Ordering::AcqRel) {
            (self.inner.unsubscribe)();
        }
    }

    /// Returns `true` once the subscription has been removed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
