//! Error types for the fiber, queue, and configuration layers.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Infrastructure errors (full queue, bad lifecycle) are synchronous and
//!   local to the call that triggered them
//! - User-callback panics are never swallowed by the default executor; a
//!   host chooses its own policy by supplying a trapping executor

use thiserror::Error;

/// Failure to admit a task into a queue or worker pool.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// A bounded queue could not accept the task within its configured wait
    /// policy. Carries the queue depth observed at failure time.
    ///
    /// Not retried automatically; the caller decides whether to retry, drop,
    /// or escalate.
    #[error("queue is full (depth {depth})")]
    QueueFull {
        /// Number of tasks queued when admission failed.
        depth: usize,
    },

    /// The queue has been stopped. Producers blocked in admission are
    /// released with this error rather than left hanging.
    #[error("queue is stopped")]
    Stopped,
}

/// Invalid fiber lifecycle transition. Indicates programmer error.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start` was called on a fiber that is already running.
    #[error("fiber has already been started")]
    AlreadyStarted,

    /// `start` was called on a fiber that has been disposed.
    #[error("fiber has been disposed")]
    Disposed,
}

/// A settings value failed to parse or validate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment override or settings field carried an unusable value.
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// The setting or environment variable name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
