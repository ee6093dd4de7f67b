//! Request/reply exercised against a real responder fiber.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use strand::{Fiber, RequestChannel, ThreadFiber};

fn fiber() -> Arc<ThreadFiber> {
    let fiber = Arc::new(ThreadFiber::builder().name("request-e2e").build());
    fiber.start().unwrap();
    fiber
}

#[test]
fn zero_subscribers_is_reported_immediately() {
    common::init_tracing();
    let channel: RequestChannel<String, String> = RequestChannel::new();
    let started = Instant::now();
    assert!(channel.send_request("anyone there?".to_string()).is_none());
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn six_replies_arrive_in_order_then_the_seventh_receive_runs_dry() {
    let fiber = fiber();
    let channel: RequestChannel<u32, u32> = RequestChannel::new();

    channel.subscribe(&fiber, |request| {
        let base = *request.payload();
        for n in 0..6 {
            request.send_reply(base + n);
        }
    });

    let receiver = channel.send_request(10).expect("responder is subscribed");
    for n in 0..6 {
        assert_eq!(receiver.receive(Duration::from_secs(2)), Some(10 + n));
    }
    assert_eq!(receiver.receive(Duration::from_millis(50)), None);

    fiber.dispose();
    fiber.join();
}

#[test]
fn a_slow_responder_is_awaited_up_to_the_timeout() {
    let fiber = fiber();
    let channel: RequestChannel<u32, u32> = RequestChannel::new();

    channel.subscribe(&fiber, |request| {
        std::thread::sleep(Duration::from_millis(50));
        request.send_reply(*request.payload() * 2);
    });

    let receiver = channel.send_request(21).expect("responder is subscribed");
    assert_eq!(receiver.receive(Duration::from_secs(2)), Some(42));

    fiber.dispose();
    fiber.join();
}

#[test]
fn dropping_the_receiver_rejects_late_replies() {
    let fiber = fiber();
    let channel: RequestChannel<u32, u32> = RequestChannel::new();

    let parked: Arc<parking_lot::Mutex<Vec<strand::Request<u32, u32>>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let p = Arc::clone(&parked);
    channel.subscribe(&fiber, move |request| p.lock().push(request));

    let receiver = channel.send_request(1).expect("responder is subscribed");
    assert!(common::wait_until(Duration::from_secs(2), || {
        !parked.lock().is_empty()
    }));
    drop(receiver);

    let request = parked.lock().pop().expect("request was delivered");
    assert!(!request.send_reply(7));

    fiber.dispose();
    fiber.join();
}

#[test]
fn responder_disposal_turns_the_channel_into_no_subscriber() {
    let fiber = fiber();
    let channel: RequestChannel<u32, u32> = RequestChannel::new();
    channel.subscribe(&fiber, |request| {
        request.send_reply(0);
    });
    assert_eq!(channel.responder_count(), 1);

    fiber.dispose();
    fiber.join();
    assert_eq!(channel.responder_count(), 0);
    assert!(channel.send_request(5).is_none());
}
