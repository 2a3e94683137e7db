use super::*;
use crate::protocol::MessageType;

fn ping() -> Message {
    Message::ping()
}

// =============================================================
// Backoff policies
// =============================================================

#[test]
fn fixed_policy_always_returns_same_delay() {
    let policy = BackoffPolicy::Fixed { delay_ms: 5_000 };
    assert_eq!(policy.delay_ms(0), Some(5_000));
    assert_eq!(policy.delay_ms(3), Some(5_000));
    assert_eq!(policy.delay_ms(1_000), Some(5_000));
}

#[test]
fn exponential_policy_grows_by_factor() {
    let policy = BackoffPolicy::Exponential {
        base_ms: 1_000,
        factor: 1.5,
        cap_ms: 30_000,
        max_attempts: 10,
    };
    assert_eq!(policy.delay_ms(0), Some(1_000));
    assert_eq!(policy.delay_ms(1), Some(1_500));
    assert_eq!(policy.delay_ms(2), Some(2_250));
}

#[test]
fn exponential_policy_caps_delay() {
    let policy = BackoffPolicy::Exponential {
        base_ms: 1_000,
        factor: 1.5,
        cap_ms: 30_000,
        max_attempts: 100,
    };
    assert_eq!(policy.delay_ms(20), Some(30_000));
}

#[test]
fn exponential_policy_gives_up_after_max_attempts() {
    let policy = BackoffPolicy::Exponential {
        base_ms: 1_000,
        factor: 1.5,
        cap_ms: 30_000,
        max_attempts: 3,
    };
    assert!(policy.delay_ms(2).is_some());
    assert_eq!(policy.delay_ms(3), None);
}

// =============================================================
// Operation queue
// =============================================================

#[test]
fn queue_stamps_unstamped_messages() {
    let mut queue = OperationQueue::new();
    let mut msg = ping();
    msg.timestamp = None;
    queue.push(msg);
    let drained = queue.drain();
    assert!(drained[0].timestamp.is_some());
}

#[test]
fn queue_keeps_existing_timestamps() {
    let mut queue = OperationQueue::new();
    let mut msg = ping();
    msg.timestamp = Some(7);
    queue.push(msg);
    assert_eq!(queue.drain()[0].timestamp, Some(7));
}

#[test]
fn queue_drains_fifo() {
    let mut queue = OperationQueue::new();
    for i in 0..5 {
        let mut msg = ping();
        msg.timestamp = Some(i);
        queue.push(msg);
    }
    let order: Vec<i64> = queue.drain().iter().filter_map(|m| m.timestamp).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    assert!(queue.is_empty());
}

// =============================================================
// State machine
// =============================================================

#[test]
fn starts_connecting() {
    let core = ConnectionCore::default();
    assert_eq!(core.state(), ConnectionState::Connecting);
}

#[test]
fn first_open_is_not_a_reconnect() {
    let mut core = ConnectionCore::default();
    assert!(!core.on_open());
    assert_eq!(core.state(), ConnectionState::Connected);
}

#[test]
fn open_after_close_is_a_reconnect_and_resets_attempts() {
    let mut core = ConnectionCore::default();
    core.on_open();
    core.on_close();
    core.on_close();
    assert_eq!(core.attempts(), 2);
    assert!(core.on_open());
    assert_eq!(core.attempts(), 0);
    assert_eq!(core.state(), ConnectionState::Connected);
}

#[test]
fn close_schedules_reconnect_with_growing_delay() {
    let mut core = ConnectionCore::default();
    core.on_open();
    let first = core.on_close().unwrap();
    let second = core.on_close().unwrap();
    assert_eq!(core.state(), ConnectionState::Reconnecting);
    assert!(second > first);
}

#[test]
fn bounded_policy_surfaces_terminal_error() {
    let mut core = ConnectionCore::new(BackoffPolicy::Exponential {
        base_ms: 10,
        factor: 2.0,
        cap_ms: 100,
        max_attempts: 2,
    });
    assert!(core.on_close().is_some());
    assert!(core.on_close().is_some());
    assert!(core.on_close().is_none());
    assert_eq!(core.state(), ConnectionState::Error);
}

#[test]
fn fixed_policy_never_gives_up() {
    let mut core = ConnectionCore::new(BackoffPolicy::Fixed { delay_ms: 5_000 });
    for _ in 0..50 {
        assert_eq!(core.on_close(), Some(5_000));
    }
    assert_eq!(core.state(), ConnectionState::Reconnecting);
}

#[test]
fn send_transmits_when_connected() {
    let mut core = ConnectionCore::default();
    core.on_open();
    match core.send(ping()) {
        SendOutcome::Transmit(msg) => assert_eq!(msg.kind, MessageType::Ping),
        SendOutcome::Queued => panic!("expected transmit"),
    }
    assert_eq!(core.queued(), 0);
}

#[test]
fn send_queues_when_not_connected() {
    let mut core = ConnectionCore::default();
    assert_eq!(core.send(ping()), SendOutcome::Queued);
    core.on_open();
    core.on_close();
    assert_eq!(core.send(ping()), SendOutcome::Queued);
    assert_eq!(core.queued(), 2);
}

#[test]
fn flush_preserves_enqueue_order_across_disconnect() {
    let mut core = ConnectionCore::default();
    for i in 0..4 {
        let mut msg = ping();
        msg.timestamp = Some(i);
        core.send(msg);
    }
    core.on_open();
    let order: Vec<i64> = core.flush().iter().filter_map(|m| m.timestamp).collect();
    assert_eq!(order, vec![0, 1, 2, 3]);
    assert_eq!(core.queued(), 0);
}

#[test]
fn requeue_puts_the_message_ahead_of_later_arrivals() {
    let mut core = ConnectionCore::default();
    let mut later = ping();
    later.timestamp = Some(2);
    core.send(later);

    // The message that failed to transmit goes back in front, not behind.
    let mut failed = ping();
    failed.timestamp = Some(1);
    core.requeue(failed);
    let order: Vec<i64> = core.flush().iter().filter_map(|m| m.timestamp).collect();
    assert_eq!(order, vec![1, 2]);
}

#[test]
fn flush_interrupted_by_a_failed_transmit_keeps_order() {
    let mut core = ConnectionCore::default();
    for i in 0..3 {
        let mut msg = ping();
        msg.timestamp = Some(i);
        core.send(msg);
    }
    core.on_open();

    // The driver pops one message at a time; the first send fails and is
    // requeued, leaving the whole queue intact and ordered.
    let first = core.pop_queued().unwrap();
    assert_eq!(first.timestamp, Some(0));
    core.requeue(first);
    assert_eq!(core.queued(), 3);
    let order: Vec<i64> = core.flush().iter().filter_map(|m| m.timestamp).collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn pop_queued_drains_fifo_to_empty() {
    let mut core = ConnectionCore::default();
    for i in 0..2 {
        let mut msg = ping();
        msg.timestamp = Some(i);
        core.send(msg);
    }
    assert_eq!(core.pop_queued().unwrap().timestamp, Some(0));
    assert_eq!(core.pop_queued().unwrap().timestamp, Some(1));
    assert!(core.pop_queued().is_none());
}

#[test]
fn shutdown_is_quiet_disconnect() {
    let mut core = ConnectionCore::default();
    core.on_open();
    core.shutdown();
    assert_eq!(core.state(), ConnectionState::Disconnected);
}
