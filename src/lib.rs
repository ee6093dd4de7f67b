//! Strand: fiber-based concurrency for Rust.
//!
//! # Overview
//!
//! A fiber is a logical single-threaded execution context: producers on
//! arbitrary threads hand it callbacks, and the fiber executes them one
//! batch at a time on exactly one consumer context. Typed channels sit in
//! front of fibers and decide *how* a producer-thread publish becomes a
//! consumer-thread callback: immediately, coalesced into ordered batches,
//! coalesced per key, or collapsed to the most recent value.
//!
//! # Core Guarantees
//!
//! - **Single-threaded-apparent execution**: per fiber, callbacks never run
//!   concurrently (one dedicated thread, or one pool work item at a time)
//! - **FIFO per queue**: tasks enqueued onto one fiber run in enqueue order
//! - **Backpressure, not silent loss**: bounded mailboxes block producers up
//!   to a configured wait, then fail with a typed error carrying the depth
//! - **Race-safe cancellation**: every schedule call returns a handle whose
//!   cancel wins even against a concurrently firing timer
//! - **Deterministic teardown**: disposal cancels timers, unsubscribes
//!   channels, then stops the queue; nothing fires after dispose
//!
//! # Module Structure
//!
//! - [`queue`]: action queues, cancellable pending actions, batch executors
//! - [`timer`]: the dedicated timer thread and per-fiber schedulers
//! - [`fiber`]: thread-backed, pool-backed, and deterministic stub fibers
//! - [`pool`]: the shared worker pool collaborator
//! - [`channel`]: multicast channels, delivery variants, request/reply
//! - [`config`]: settings structs and `STRAND_*` environment overrides
//! - [`error`]: the error taxonomy
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use strand::{Channel, Fiber, ThreadFiber};
//!
//! let fiber = Arc::new(ThreadFiber::new());
//! fiber.start().unwrap();
//!
//! let channel = Channel::new();
//! let (tx, rx) = std::sync::mpsc::channel();
//! channel.subscribe(&fiber, move |msg: u64| {
//!     let _ = tx.send(msg * 2);
//! });
//!
//! channel.publish(21);
//! assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(42));
//! fiber.dispose();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod config;
pub mod error;
pub mod fiber;
pub mod pool;
pub mod queue;
pub mod timer;

pub use channel::{
    BatchSubscriber, Channel, ChannelSubscriber, KeyedBatchSubscriber, LastSubscriber,
    ReplyReceiver, Request, RequestChannel, Subscriber, Subscription,
};
pub use config::{PoolSettings, QueueSettings, Settings, ThreadSettings};
pub use error::{ConfigError, EnqueueError, LifecycleError};
pub use fiber::{
    ExecutionContext, ExecutionContextExt, Fiber, FiberExt, PoolFiber, StubFiber,
    SubscriptionRegistry, ThreadFiber, ThreadFiberBuilder,
};
pub use pool::{SpawningPool, WorkerPool};
pub use queue::{
    ActionQueue, BatchExecutor, BusyWaitQueue, DefaultExecutor, PanicTrapExecutor, PendingAction,
    Task, TaskQueue,
};
pub use timer::{Scheduler, TimerHandle, TimerThread};
