//! Shared worker pool backing pool-based fibers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;

use crate::config::PoolSettings;
use crate::error::EnqueueError;
use crate::queue::Task;

/// The collaborator contract a pool fiber needs from any backing pool:
/// queue one zero-argument work item for asynchronous execution, signalling
/// a capacity problem with an error rather than silently dropping it.
pub trait WorkerPool: Send + Sync {
    /// Submits a work item for execution on some pool thread.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError`] if the pool cannot accept the item.
    fn submit(&self, work: Task) -> Result<(), EnqueueError>;
}

struct PoolShared {
    settings: PoolSettings,
    queue: SegQueue<Task>,
    pending: AtomicUsize,
    active: AtomicUsize,
    busy: AtomicUsize,
    shutdown: AtomicBool,
    /// Mutex/condvar pair used only for parking idle workers.
    park_mutex: Mutex<()>,
    parked: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Default [`WorkerPool`]: lock-free injection queue, condvar-parked
/// workers, lazy spawning up to `max_threads`, and idle retirement above
/// `min_threads`.
///
/// A panicking work item is caught and logged; the worker survives. Work
/// items queued before shutdown still execute during a graceful
/// [`shutdown_and_wait`](SpawningPool::shutdown_and_wait).
pub struct SpawningPool {
    shared: Arc<PoolShared>,
}

impl SpawningPool {
    /// Creates a pool and eagerly spawns `min_threads` workers.
    #[must_use]
    pub fn new(settings: PoolSettings) -> Self {
        let shared = Arc::new(PoolShared {
            settings,
            queue: SegQueue::new(),
            pending: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            park_mutex: Mutex::new(()),
            parked: Condvar::new(),
            handles: Mutex::new(Vec::new()),
        });
        let pool = Self { shared };
        for _ in 0..pool.shared.settings.min_threads {
            spawn_worker(&pool.shared);
        }
        pool
    }

    /// Number of live worker threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Number of work items not yet picked up.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Relaxed)
    }

    /// Returns `true` once shutdown has been initiated.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Initiates shutdown: no new work is accepted, queued work drains.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _guard = self.shared.park_mutex.lock().expect("pool lock poisoned");
        self.shared.parked.notify_all();
    }

    /// Shuts down and waits up to `timeout` for workers to exit.
    ///
    /// Returns `true` if every worker exited within the timeout.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = std::time::Instant::now() + timeout;
        while self.shared.active.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            {
                let _guard = self.shared.park_mutex.lock().expect("pool lock poisoned");
                self.shared.parked.notify_all();
            }
            thread::sleep(Duration::from_millis(10).min(remaining));
        }
        let mut handles = self.shared.handles.lock().expect("pool lock poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        true
    }
}

impl WorkerPool for SpawningPool {
    fn submit(&self, work: Task) -> Result<(), EnqueueError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(EnqueueError::Stopped);
        }
        self.shared.queue.push(work);
        self.shared.pending.fetch_add(1, Ordering::Relaxed);
        maybe_spawn_worker(&self.shared);
        let _guard = self.shared.park_mutex.lock().expect("pool lock poisoned");
        self.shared.parked.notify_one();
        Ok(())
    }
}

impl Drop for SpawningPool {
    fn drop(&mut self) {
        self.shutdown();
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}

fn spawn_worker(shared: &Arc<PoolShared>) {
    let worker = Arc::clone(shared);
    let index = shared.active.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-{}", shared.settings.name_prefix, index);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            worker_loop(&worker);
            worker.active.fetch_sub(1, Ordering::Relaxed);
        })
        .expect("failed to spawn pool worker");
    shared
        .handles
        .lock()
        .expect("pool lock poisoned")
        .push(handle);
    tracing::debug!(
        active = shared.active.load(Ordering::Relaxed),
        "pool worker spawned"
    );
}

fn maybe_spawn_worker(shared: &Arc<PoolShared>) {
    let active = shared.active.load(Ordering::Relaxed);
    let busy = shared.busy.load(Ordering::Relaxed);
    let pending = shared.pending.load(Ordering::Relaxed);
    // Grow only when every live worker is occupied and work is waiting.
    if active < shared.settings.max_threads && busy >= active && pending > 0 {
        spawn_worker(shared);
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        if let Some(work) = shared.queue.pop() {
            shared.pending.fetch_sub(1, Ordering::Relaxed);
            shared.busy.fetch_add(1, Ordering::Relaxed);
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(work));
            shared.busy.fetch_sub(1, Ordering::Relaxed);
            if result.is_err() {
                tracing::error!("pool work item panicked");
            }
            continue;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }

        let active = shared.active.load(Ordering::Relaxed);
        if active > shared.settings.min_threads {
            let guard = shared.park_mutex.lock().expect("pool lock poisoned");
            // Work or shutdown may have landed between the pop and taking
            // the park lock; parking now would miss that wakeup.
            if !shared.queue.is_empty() || shared.shutdown.load(Ordering::Acquire) {
                continue;
            }
            let (_guard, result) = shared
                .parked
                .wait_timeout(guard, shared.settings.idle_timeout)
                .expect("pool lock poisoned");
            if result.timed_out()
                && shared.queue.is_empty()
                && shared.active.load(Ordering::Relaxed) > shared.settings.min_threads
            {
                tracing::debug!("idle pool worker retiring");
                return;
            }
        } else {
            let guard = shared.park_mutex.lock().expect("pool lock poisoned");
            if !shared.queue.is_empty() || shared.shutdown.load(Ordering::Acquire) {
                continue;
            }
            let _guard = shared.parked.wait(guard).expect("pool lock poisoned");
        }
    }
}
