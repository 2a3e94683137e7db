//! Connection state machine and the offline operation queue.
//!
//! This module is the pure half of the connection manager: it tracks the
//! connection lifecycle, decides when a message is transmitted versus
//! queued, computes reconnect delays, and drains the queue in strict FIFO
//! order after a reconnect. The async socket loop in [`crate::transport`]
//! drives it; nothing here performs I/O, so the whole state machine is
//! unit-testable.

#[cfg(test)]
#[path = "connection_test.rs"]
mod connection_test;

use std::collections::VecDeque;

use crate::consts::{
    MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_MS, RECONNECT_CAP_MS, RECONNECT_FACTOR,
};
use crate::protocol::{Message, now_ms};

/// Lifecycle state of the canvas connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial connection attempt in progress.
    Connecting,
    /// Socket open; messages are transmitted immediately.
    Connected,
    /// Socket closed and no reconnect scheduled yet.
    Disconnected,
    /// Socket closed; a reconnect attempt is scheduled.
    Reconnecting,
    /// Reconnect attempts exhausted. Terminal until a manual `connect`.
    Error,
}

/// Reconnect delay policy.
///
/// Two divergent policies exist in the wild for this protocol: a fixed
/// delay retried forever, and exponential backoff with a cap and a bounded
/// attempt count. Both are modeled; [`BackoffPolicy::default`] is the
/// exponential variant, which is what the session uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffPolicy {
    /// Retry every `delay_ms`, forever.
    Fixed {
        /// Delay between attempts, in milliseconds.
        delay_ms: u64,
    },
    /// Retry after `base_ms * factor^attempts`, capped at `cap_ms`, giving
    /// up after `max_attempts`.
    Exponential {
        /// First delay, in milliseconds.
        base_ms: u64,
        /// Growth factor per attempt.
        factor: f64,
        /// Upper bound on any single delay, in milliseconds.
        cap_ms: u64,
        /// Attempts before the connection enters the terminal error state.
        max_attempts: u32,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            base_ms: RECONNECT_BASE_MS,
            factor: RECONNECT_FACTOR,
            cap_ms: RECONNECT_CAP_MS,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// The delay before attempt number `attempts` (zero-based), or `None`
    /// when the policy has given up.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )]
    pub fn delay_ms(&self, attempts: u32) -> Option<u64> {
        match *self {
            Self::Fixed { delay_ms } => Some(delay_ms),
            Self::Exponential { base_ms, factor, cap_ms, max_attempts } => {
                if attempts >= max_attempts {
                    return None;
                }
                let raw = (base_ms as f64) * factor.powi(attempts.min(64) as i32);
                Some((raw as u64).min(cap_ms))
            }
        }
    }
}

/// Outcome of [`ConnectionCore::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The socket is open; transmit this message now.
    Transmit(Message),
    /// The socket is not open; the message was queued for the next flush.
    Queued,
}

/// FIFO buffer of outbound messages accumulated while disconnected.
///
/// Unbounded; drained strictly in enqueue order on reconnect. Messages get
/// a locally-assigned timestamp at enqueue time if they don't carry one.
#[derive(Default)]
pub struct OperationQueue {
    messages: VecDeque<Message>,
}

impl OperationQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, stamping it with the local clock if unstamped.
    pub fn push(&mut self, mut message: Message) {
        if message.timestamp.is_none() {
            message.timestamp = Some(now_ms());
        }
        self.messages.push_back(message);
    }

    /// Put a message back at the front, ahead of everything queued later.
    pub fn push_front(&mut self, mut message: Message) {
        if message.timestamp.is_none() {
            message.timestamp = Some(now_ms());
        }
        self.messages.push_front(message);
    }

    /// Remove and return the oldest queued message.
    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    /// Remove and return all queued messages in enqueue order.
    pub fn drain(&mut self) -> Vec<Message> {
        self.messages.drain(..).collect()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Pure connection state machine.
pub struct ConnectionCore {
    state: ConnectionState,
    policy: BackoffPolicy,
    attempts: u32,
    /// Whether this connection has been open at least once, so the next
    /// successful open is a reconnect rather than a first connect.
    was_connected: bool,
    queue: OperationQueue,
}

impl ConnectionCore {
    /// Create a state machine with the given backoff policy, in the
    /// `Connecting` state.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Connecting,
            policy,
            attempts: 0,
            was_connected: false,
            queue: OperationQueue::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of consecutive failed reconnect attempts.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of messages waiting for the next flush.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The socket opened. Resets the attempt counter and returns `true` if
    /// this open is a reconnect, in which case the caller must send
    /// `RECONNECT_REQUEST` and flush the queue after the settle delay.
    pub fn on_open(&mut self) -> bool {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        let reconnect = self.was_connected;
        self.was_connected = true;
        reconnect
    }

    /// The socket closed or errored. Returns the delay in milliseconds
    /// before the next reconnect attempt, or `None` when the policy has
    /// given up, in which case the state is terminal `Error`.
    pub fn on_close(&mut self) -> Option<u64> {
        match self.policy.delay_ms(self.attempts) {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting;
                self.attempts += 1;
                Some(delay)
            }
            None => {
                self.state = ConnectionState::Error;
                None
            }
        }
    }

    /// Route an outbound message: transmit when connected, queue otherwise.
    /// Queueing is the non-fatal failure path; the message is delivered on
    /// the next flush.
    pub fn send(&mut self, message: Message) -> SendOutcome {
        if self.state == ConnectionState::Connected {
            SendOutcome::Transmit(message)
        } else {
            self.queue.push(message);
            SendOutcome::Queued
        }
    }

    /// Drain the operation queue for flushing, strictly FIFO.
    pub fn flush(&mut self) -> Vec<Message> {
        self.queue.drain()
    }

    /// Remove the oldest queued message for transmission. Popping one at a
    /// time lets a flush abort mid-way without losing the remainder.
    pub fn pop_queued(&mut self) -> Option<Message> {
        self.queue.pop()
    }

    /// Put a message back at the front of the queue after a failed
    /// transmit, so the next flush replays it first and the original send
    /// order holds.
    pub fn requeue(&mut self, message: Message) {
        self.queue.push_front(message);
    }

    /// Tear down to `Disconnected` without scheduling a reconnect. Used
    /// when the session is closed deliberately.
    pub fn shutdown(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

impl Default for ConnectionCore {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
