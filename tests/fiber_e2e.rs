//! End-to-end fiber lifecycle tests across both production fiber kinds.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::wait_until;
use strand::{
    Channel, ExecutionContextExt, Fiber, FiberExt, LifecycleError, PanicTrapExecutor, PoolFiber,
    PoolSettings, SpawningPool, ThreadFiber,
};

fn thread_fiber() -> Arc<ThreadFiber> {
    let fiber = Arc::new(ThreadFiber::builder().name("fiber-e2e").build());
    fiber.start().unwrap();
    fiber
}

#[test]
fn pre_start_enqueues_run_in_order_before_post_start_work() {
    common::init_tracing();
    let fiber = Arc::new(ThreadFiber::new());
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for n in 0..10 {
        let log = Arc::clone(&log);
        fiber.enqueue(move || log.lock().push(n)).unwrap();
    }
    fiber.start().unwrap();
    for n in 10..15 {
        let log = Arc::clone(&log);
        fiber.enqueue(move || log.lock().push(n)).unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || log.lock().len() == 15));
    assert_eq!(*log.lock(), (0..15).collect::<Vec<_>>());
    fiber.dispose();
    fiber.join();
}

#[test]
fn double_start_is_an_error_on_both_fiber_kinds() {
    let fiber = thread_fiber();
    assert_eq!(fiber.start(), Err(LifecycleError::AlreadyStarted));
    fiber.dispose();
    fiber.join();

    let pool = Arc::new(SpawningPool::new(PoolSettings::default()));
    let pool_fiber = PoolFiber::new(pool);
    pool_fiber.start().unwrap();
    assert_eq!(pool_fiber.start(), Err(LifecycleError::AlreadyStarted));
    pool_fiber.dispose();
}

#[test]
fn disposal_stops_execution_subscriptions_and_timers() {
    let fiber = thread_fiber();
    let channel: Channel<u32> = Channel::new();

    let received = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&received);
    channel.subscribe(&fiber, move |_| {
        r.fetch_add(1, Ordering::Relaxed);
    });

    let timer_hits = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&timer_hits);
    fiber.schedule(
        move || {
            t.fetch_add(1, Ordering::Relaxed);
        },
        Duration::from_millis(150),
    );

    assert!(channel.publish(1));
    assert!(wait_until(Duration::from_secs(2), || {
        received.load(Ordering::Relaxed) == 1
    }));

    fiber.dispose();
    fiber.join();

    // Subscriptions are gone: the publish finds nobody.
    assert!(!channel.publish(2));
    assert_eq!(channel.subscriber_count(), 0);

    // Enqueues after dispose are silently discarded.
    let late = Arc::new(AtomicUsize::new(0));
    let l = Arc::clone(&late);
    fiber
        .enqueue(move || {
            l.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

    // Pending timers never fire.
    thread::sleep(Duration::from_millis(300));
    assert_eq!(timer_hits.load(Ordering::Relaxed), 0);
    assert_eq!(late.load(Ordering::Relaxed), 0);
    assert_eq!(received.load(Ordering::Relaxed), 1);
}

#[test]
fn recurring_schedule_fires_repeatedly_until_cancelled() {
    let fiber = thread_fiber();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let handle = fiber.schedule_on_interval(
        move || {
            h.fetch_add(1, Ordering::Relaxed);
        },
        Duration::from_millis(5),
        Duration::from_millis(5),
    );

    assert!(wait_until(Duration::from_secs(2), || {
        hits.load(Ordering::Relaxed) >= 5
    }));
    handle.cancel();
    thread::sleep(Duration::from_millis(50));
    let settled = hits.load(Ordering::Relaxed);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(hits.load(Ordering::Relaxed), settled);

    fiber.dispose();
    fiber.join();
}

#[test]
fn pool_fibers_share_a_pool_without_interleaving_themselves() {
    let pool = Arc::new(SpawningPool::new(PoolSettings::default().with_threads(2, 4)));
    let a = Arc::new(PoolFiber::new(pool.clone()));
    let b = Arc::new(PoolFiber::new(pool.clone()));
    a.start().unwrap();
    b.start().unwrap();

    let log_a = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log_b = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for n in 0..100 {
        let la = Arc::clone(&log_a);
        a.enqueue(move || la.lock().push(n)).unwrap();
        let lb = Arc::clone(&log_b);
        b.enqueue(move || lb.lock().push(n)).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        log_a.lock().len() == 100 && log_b.lock().len() == 100
    }));
    assert_eq!(*log_a.lock(), (0..100).collect::<Vec<_>>());
    assert_eq!(*log_b.lock(), (0..100).collect::<Vec<_>>());

    a.dispose();
    b.dispose();
}

#[test]
fn trapping_executor_keeps_the_fiber_alive_after_a_panic() {
    let trapped = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&trapped);
    let fiber = Arc::new(
        ThreadFiber::builder()
            .name("trap-e2e")
            .executor(Arc::new(PanicTrapExecutor::new(Arc::new(move |_| {
                t.fetch_add(1, Ordering::Relaxed);
            }))))
            .build(),
    );
    fiber.start().unwrap();

    fiber.enqueue(|| panic!("intentional panic")).unwrap();
    let survived = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&survived);
    fiber
        .enqueue(move || {
            s.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        survived.load(Ordering::Relaxed) == 1
    }));
    assert_eq!(trapped.load(Ordering::Relaxed), 1);
    fiber.dispose();
    fiber.join();
}
