//! Settings for queues, fiber threads, and the shared worker pool.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set via `with_*` methods
//! 2. **Environment variables** — values from `STRAND_*` env vars applied
//!    through [`Settings::from_env`] or [`apply_env_overrides`]
//! 3. **Defaults** — built-in defaults from the `Default` impls
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `STRAND_MAX_QUEUE_DEPTH` | `usize` (0 = unbounded) | `queue.max_depth` |
//! | `STRAND_ENQUEUE_WAIT_MS` | `u64` | `queue.max_enqueue_wait` |
//! | `STRAND_THREAD_NAME_PREFIX` | `String` | `thread.name` |
//! | `STRAND_POOL_MIN_THREADS` | `usize` | `pool.min_threads` |
//! | `STRAND_POOL_MAX_THREADS` | `usize` | `pool.max_threads` |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable name for the bounded queue depth (0 = unbounded).
pub const ENV_MAX_QUEUE_DEPTH: &str = "STRAND_MAX_QUEUE_DEPTH";
/// Environment variable name for the producer admission wait, in milliseconds.
pub const ENV_ENQUEUE_WAIT_MS: &str = "STRAND_ENQUEUE_WAIT_MS";
/// Environment variable name for the fiber thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "STRAND_THREAD_NAME_PREFIX";
/// Environment variable name for the worker pool minimum thread count.
pub const ENV_POOL_MIN_THREADS: &str = "STRAND_POOL_MIN_THREADS";
/// Environment variable name for the worker pool maximum thread count.
pub const ENV_POOL_MAX_THREADS: &str = "STRAND_POOL_MAX_THREADS";

/// Admission and capacity settings for an action queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum number of queued tasks. `None` means unbounded.
    pub max_depth: Option<usize>,
    /// How long a producer blocks waiting for capacity before failing with
    /// `QueueFull`. Zero means fail fast without waiting.
    pub max_enqueue_wait: Duration,
}

impl QueueSettings {
    /// Unbounded queue, fail-fast admission.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_depth: None,
            max_enqueue_wait: Duration::ZERO,
        }
    }

    /// Bounded queue with the given capacity and fail-fast admission.
    #[must_use]
    pub fn bounded(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
            max_enqueue_wait: Duration::ZERO,
        }
    }

    /// Sets how long producers wait for capacity before failing.
    #[must_use]
    pub fn with_max_enqueue_wait(mut self, wait: Duration) -> Self {
        self.max_enqueue_wait = wait;
        self
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Settings for a dedicated fiber thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSettings {
    /// OS thread name.
    pub name: String,
    /// Stack size in bytes, or `None` for the platform default.
    pub stack_size: Option<usize>,
}

impl ThreadSettings {
    /// Settings with the given thread name and the default stack size.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: None,
        }
    }

    /// Sets the thread stack size in bytes.
    #[must_use]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self::named("strand-fiber")
    }
}

/// Settings for the shared worker pool backing pool fibers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Minimum number of worker threads kept alive.
    pub min_threads: usize,
    /// Maximum number of worker threads allowed.
    pub max_threads: usize,
    /// Idle time before a worker above `min_threads` retires.
    pub idle_timeout: Duration,
    /// Worker thread name prefix.
    pub name_prefix: String,
}

impl PoolSettings {
    /// Sets the thread count bounds. `max` is clamped up to `min`.
    #[must_use]
    pub fn with_threads(mut self, min: usize, max: usize) -> Self {
        self.min_threads = min;
        self.max_threads = max.max(min);
        self
    }

    /// Sets the idle timeout before excess workers retire.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_threads: 1,
            max_threads: 4,
            idle_timeout: Duration::from_secs(10),
            name_prefix: "strand-worker".to_string(),
        }
    }
}

/// Top-level settings bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Action queue admission settings.
    pub queue: QueueSettings,
    /// Dedicated fiber thread settings.
    pub thread: ThreadSettings,
    /// Shared worker pool settings.
    pub pool: PoolSettings,
}

impl Settings {
    /// Builds settings from defaults plus `STRAND_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        apply_env_overrides(&mut settings)?;
        Ok(settings)
    }
}

/// Applies `STRAND_*` environment variable overrides to `settings`.
///
/// Only variables that are set in the environment are applied.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if a variable is set but contains an
/// unparseable value.
pub fn apply_env_overrides(settings: &mut Settings) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_MAX_QUEUE_DEPTH) {
        let depth = parse_usize(ENV_MAX_QUEUE_DEPTH, &val)?;
        settings.queue.max_depth = if depth == 0 { None } else { Some(depth) };
    }
    if let Some(val) = read_env(ENV_ENQUEUE_WAIT_MS) {
        let ms = parse_u64(ENV_ENQUEUE_WAIT_MS, &val)?;
        settings.queue.max_enqueue_wait = Duration::from_millis(ms);
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        settings.thread.name = val.clone();
        settings.pool.name_prefix = val;
    }
    if let Some(val) = read_env(ENV_POOL_MIN_THREADS) {
        settings.pool.min_threads = parse_usize(ENV_POOL_MIN_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_POOL_MAX_THREADS) {
        settings.pool.max_threads = parse_usize(ENV_POOL_MAX_THREADS, &val)?;
    }
    if settings.pool.max_threads < settings.pool.min_threads {
        settings.pool.max_threads = settings.pool.min_threads;
    }
    Ok(())
}

/// Reads an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(name: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::Invalid {
            name,
            reason: format!("expected unsigned integer, got {val:?} ({e})"),
        })
}

fn parse_u64(name: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("expected u64, got {val:?} ({e})"),
    })
}
