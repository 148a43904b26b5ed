//! Channel lifecycle states and the waiter-notifying state machine.
//!
//! States are single-bit masks so transition sources and waiter targets
//! compose with `|`. Transitions are compare-and-set operations performed
//! under the waiter-list lock; waiters are one-shot callbacks fired with
//! the reached state, exactly once, after the lock is released.

use std::sync::{
    Mutex,
    atomic::{AtomicU32, Ordering},
};

/// Connect has been handed to the actor but has not completed.
pub const CONNECTING: u32 = 1 << 0;

/// The socket is connected but the channel is not yet wired up.
pub const CONNECTED: u32 = 1 << 1;

/// Local close requested; a CLOSE control frame is scheduled for egress.
pub const CLOSE_INITIATED: u32 = 1 << 2;

/// The peer's CLOSE control frame was received.
pub const CLOSE_RECEIVED: u32 = 1 << 3;

/// Graceful shutdown completed.
pub const CLOSED: u32 = 1 << 4;

/// I/O error, peer reset, or failed connect.
pub const CLOSED_UNEXPECTEDLY: u32 = 1 << 5;

/// Connected and registered; the channel accepts traffic.
pub const READY: u32 = 1 << 6;

/// States the channel can never leave.
pub const TERMINAL: u32 = CLOSED | CLOSED_UNEXPECTEDLY;

/// Every state a channel can be in.
pub const ANY: u32 =
    CONNECTING | CONNECTED | READY | CLOSE_INITIATED | CLOSE_RECEIVED | TERMINAL;

/// Every state a transition may still leave.
pub const NON_TERMINAL: u32 = ANY & !TERMINAL;

/// Human-readable name of a single-bit state, for logs and errors.
#[must_use]
pub fn state_name(state: u32) -> &'static str {
    match state {
        CONNECTING => "Connecting",
        CONNECTED => "Connected",
        READY => "Ready",
        CLOSE_INITIATED => "CloseInitiated",
        CLOSE_RECEIVED => "CloseReceived",
        CLOSED => "Closed",
        CLOSED_UNEXPECTEDLY => "ClosedUnexpectedly",
        _ => "Unknown",
    }
}

type Callback = Box<dyn FnOnce(u32) + Send>;

struct Waiter {
    target_mask: u32,
    failure_mask: u32,
    callback: Callback,
}

impl Waiter {
    fn watches(&self, state: u32) -> bool {
        (self.target_mask | self.failure_mask) & state != 0
    }
}

/// Atomic lifecycle word plus a list of one-shot waiters.
///
/// Registration may race with a transition firing from another task: the
/// waiter list and the state word are updated under one lock, so each
/// callback runs exactly once, either synchronously at registration time
/// (condition already true) or from the transition that satisfies it.
pub(crate) struct StateMachine {
    state: AtomicU32,
    waiters: Mutex<Vec<Waiter>>,
}

impl StateMachine {
    pub(crate) fn new(initial: u32) -> Self {
        Self {
            state: AtomicU32::new(initial),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Current state word.
    pub(crate) fn current(&self) -> u32 { self.state.load(Ordering::Acquire) }

    /// Whether the current state intersects `mask`.
    pub(crate) fn is_in_any(&self, mask: u32) -> bool { self.current() & mask != 0 }

    /// Move to `target` if the current state is within `allowed`.
    ///
    /// Returns whether the transition fired; terminal states are never
    /// left, whatever `allowed` says. Waiters watching `target` are
    /// removed under the lock and invoked after it is released.
    pub(crate) fn try_transition(&self, allowed: u32, target: u32) -> bool {
        let fired = {
            let mut waiters = self.waiters.lock().expect("state lock poisoned");
            let current = self.state.load(Ordering::Relaxed);
            if current & allowed == 0 || current & TERMINAL != 0 {
                return false;
            }
            self.state.store(target, Ordering::Release);
            tracing::trace!(
                prev = state_name(current),
                next = state_name(target),
                "channel state transition"
            );

            let mut fired = Vec::new();
            let mut index = 0;
            while index < waiters.len() {
                if waiters[index].watches(target) {
                    fired.push(waiters.swap_remove(index));
                } else {
                    index += 1;
                }
            }
            fired
        };

        for waiter in fired {
            (waiter.callback)(target);
        }
        true
    }

    /// Move to `target` from any non-terminal state.
    pub(crate) fn transition(&self, target: u32) -> bool {
        self.try_transition(NON_TERMINAL, target)
    }

    /// Register a one-shot waiter for `target_mask`, failing over to
    /// `failure_mask`.
    ///
    /// If the current state already intersects either mask the callback is
    /// invoked immediately on the registering task.
    pub(crate) fn listen(
        &self,
        target_mask: u32,
        failure_mask: u32,
        callback: impl FnOnce(u32) + Send + 'static,
    ) {
        let current = {
            let mut waiters = self.waiters.lock().expect("state lock poisoned");
            let current = self.state.load(Ordering::Relaxed);
            if current & (target_mask | failure_mask) == 0 {
                waiters.push(Waiter {
                    target_mask,
                    failure_mask,
                    callback: Box::new(callback),
                });
                return;
            }
            current
        };

        callback(current);
    }
}
