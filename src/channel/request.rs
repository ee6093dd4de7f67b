//! Request/reply layered over a channel.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::fiber::Fiber;

use super::{Channel, Subscription};

struct ReplyInner<Rep> {
    queue: VecDeque<Rep>,
    closed: bool,
}

struct ReplyState<Rep> {
    inner: Mutex<ReplyInner<Rep>>,
    available: Condvar,
}

impl<Rep> ReplyState<Rep> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ReplyInner {
                queue: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn push(&self, reply: Rep) -> bool {
        let mut inner = self.inner.lock().expect("reply lock poisoned");
        if inner.closed {
            return false;
        }
        inner.queue.push_back(reply);
        self.available.notify_one();
        true
    }

    fn close(&self) {
        let mut inner = self.inner.lock().expect("reply lock poisoned");
        inner.closed = true;
        self.available.notify_all();
    }
}

/// A request in flight: the payload plus the way back.
///
/// Clones share the same reply queue, so every responder on the channel
/// answers the same requester. `send_reply` may be called zero, one, or
/// many times.
pub struct Request<Req, Rep> {
    payload: Arc<Req>,
    reply: Arc<ReplyState<Rep>>,
}

impl<Req, Rep> Request<Req, Rep> {
    /// The request payload.
    #[must_use]
    pub fn payload(&self) -> &Req {
        &self.payload
    }

    /// Queues one reply for the requester.
    ///
    /// Returns `false` if the requester has already dropped or closed its
    /// receiver; a late reply is rejected silently, never an error.
    pub fn send_reply(&self, reply: Rep) -> bool {
        self.reply.push(reply)
    }
}

impl<Req, Rep> Clone for Request<Req, Rep> {
    fn clone(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            reply: Arc::clone(&self.reply),
        }
    }
}

/// Receives the replies to one request.
///
/// Dropping the receiver closes it: later `send_reply` calls return `false`
/// and later `receive` calls return `None` immediately instead of blocking.
pub struct ReplyReceiver<Rep> {
    state: Arc<ReplyState<Rep>>,
}

impl<Rep> ReplyReceiver<Rep> {
    /// Pops one reply, blocking up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or once the receiver is closed.
    pub fn receive(&self, timeout: Duration) -> Option<Rep> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.state.inner.lock().expect("reply lock poisoned");
        loop {
            if inner.closed {
                return None;
            }
            if let Some(reply) = inner.queue.pop_front() {
                return Some(reply);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .state
                .available
                .wait_timeout(inner, remaining)
                .expect("reply lock poisoned");
            inner = guard;
        }
    }

    /// Pops one reply if one is already queued, without blocking.
    pub fn try_receive(&self) -> Option<Rep> {
        let mut inner = self.state.inner.lock().expect("reply lock poisoned");
        if inner.closed {
            return None;
        }
        inner.queue.pop_front()
    }

    /// Closes the receiver; replies sent afterwards are rejected.
    pub fn close(&self) {
        self.state.close();
    }
}

impl<Rep> Drop for ReplyReceiver<Rep> {
    fn drop(&mut self) {
        self.state.close();
    }
}

/// Typed request/reply conduit.
///
/// `send_request` publishes onto an internal channel and hands back a
/// blocking, timeout-bounded receiver; responders subscribe like on any
/// other channel and answer through the request object itself.
pub struct RequestChannel<Req, Rep> {
    requests: Channel<Request<Req, Rep>>,
}

impl<Req, Rep> RequestChannel<Req, Rep>
where
    Req: Send + Sync + 'static,
    Rep: Send + 'static,
{
    /// Creates a request channel with no responders.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: Channel::new(),
        }
    }

    /// Publishes a request; returns `None` when no responder is subscribed,
    /// without blocking.
    pub fn send_request(&self, payload: Req) -> Option<ReplyReceiver<Rep>> {
        let state = Arc::new(ReplyState::new());
        let request = Request {
            payload: Arc::new(payload),
            reply: Arc::clone(&state),
        };
        if self.requests.publish(request) {
            Some(ReplyReceiver { state })
        } else {
            None
        }
    }

    /// Subscribes a responder running on `fiber`.
    pub fn subscribe<F, H>(&self, fiber: &Arc<F>, handler: H) -> Subscription
    where
        F: Fiber + 'static,
        H: Fn(Request<Req, Rep>) + Send + Sync + 'static,
    {
        self.requests.subscribe(fiber, handler)
    }

    /// Number of subscribed responders.
    #[must_use]
    pub fn responder_count(&self) -> usize {
        self.requests.subscriber_count()
    }
}

impl<Req, Rep> Default for RequestChannel<Req, Rep>
where
    Req: Send + Sync + 'static,
    Rep: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
