//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::time::{Duration, Instant};

/// Polls `done` until it returns `true` or `deadline` elapses.
///
/// Returns the final value of `done`, so callers can `assert!` on it.
pub fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Installs a test tracing subscriber honoring `RUST_LOG`; safe to call
/// from every test.
#[allow(dead_code)]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
