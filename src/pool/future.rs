//! One-shot, resettable handle for an asynchronous channel request.
//!
//! A `PooledFuture` is poll-based like the rest of the pool's surface:
//! callers may spin on [`poll`](PooledFuture::poll) /
//! [`is_failed`](PooledFuture::is_failed) or await
//! [`await_resolved`](PooledFuture::await_resolved). After the outcome has
//! been consumed, [`release`](PooledFuture::release) returns the handle to
//! its empty pre-request state.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::{channel::Channel, error::ConnectError};

#[derive(Default)]
enum FutureState {
    /// Empty pre-request state.
    #[default]
    Idle,
    /// A connect is in flight.
    Pending,
    Resolved(Arc<Channel>),
    Failed(ConnectError),
}

struct FutureInner {
    state: Mutex<FutureState>,
    notify: Notify,
}

/// Async result handle for a pooled channel request.
///
/// Clones share the same underlying slot; the pool keeps one clone to
/// settle the request from the channel's lifecycle waiter.
#[derive(Clone)]
pub struct PooledFuture {
    inner: Arc<FutureInner>,
}

impl PooledFuture {
    fn with_state(state: FutureState) -> Self {
        Self {
            inner: Arc::new(FutureInner {
                state: Mutex::new(state),
                notify: Notify::new(),
            }),
        }
    }

    pub(crate) fn pending() -> Self { Self::with_state(FutureState::Pending) }

    pub(crate) fn resolved_with(channel: Arc<Channel>) -> Self {
        Self::with_state(FutureState::Resolved(channel))
    }

    pub(crate) fn failed_with(error: ConnectError) -> Self {
        Self::with_state(FutureState::Failed(error))
    }

    /// The resolved channel, if the request has succeeded.
    #[must_use]
    pub fn poll(&self) -> Option<Arc<Channel>> {
        match &*self.inner.state.lock().expect("future lock poisoned") {
            FutureState::Resolved(channel) => Some(Arc::clone(channel)),
            _ => None,
        }
    }

    /// Whether the request has failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(
            &*self.inner.state.lock().expect("future lock poisoned"),
            FutureState::Failed(_)
        )
    }

    /// The failure cause, if the request has failed.
    #[must_use]
    pub fn failure(&self) -> Option<ConnectError> {
        match &*self.inner.state.lock().expect("future lock poisoned") {
            FutureState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Reset the handle to its empty pre-request state.
    ///
    /// A late settlement of the abandoned request is discarded.
    pub fn release(&self) {
        *self.inner.state.lock().expect("future lock poisoned") = FutureState::Idle;
    }

    /// Wait until the request settles.
    ///
    /// # Errors
    ///
    /// Returns the [`ConnectError`] the request failed with.
    pub async fn await_resolved(&self) -> Result<Arc<Channel>, ConnectError> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register for a wake-up before inspecting the slot, so a
            // settlement racing with this check is never missed.
            notified.as_mut().enable();

            {
                let state = self.inner.state.lock().expect("future lock poisoned");
                match &*state {
                    FutureState::Resolved(channel) => return Ok(Arc::clone(channel)),
                    FutureState::Failed(error) => return Err(error.clone()),
                    FutureState::Idle | FutureState::Pending => {}
                }
            }

            notified.await;
        }
    }

    /// Settle the request with a ready channel. One-shot: only a pending
    /// request can be resolved.
    pub(crate) fn resolve(&self, channel: Arc<Channel>) {
        self.settle(FutureState::Resolved(channel));
    }

    /// Settle the request with a failure. One-shot: only a pending request
    /// can fail.
    pub(crate) fn fail(&self, error: ConnectError) {
        self.settle(FutureState::Failed(error));
    }

    fn settle(&self, outcome: FutureState) {
        {
            let mut state = self.inner.state.lock().expect("future lock poisoned");
            if !matches!(&*state, FutureState::Pending) {
                return;
            }
            *state = outcome;
        }
        self.inner.notify.notify_waiters();
    }
}

impl std::fmt::Debug for PooledFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.state.lock().expect("future lock poisoned") {
            FutureState::Idle => "Idle",
            FutureState::Pending => "Pending",
            FutureState::Resolved(_) => "Resolved",
            FutureState::Failed(_) => "Failed",
        };
        f.debug_struct("PooledFuture").field("state", &state).finish()
    }
}
