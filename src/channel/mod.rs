//! One TCP connection plus its framing and lifecycle wrapper.
//!
//! A [`Channel`] is shared between the pool, its users, and the actor task
//! that owns the socket. All socket I/O and every I/O-driven state
//! transition happen on the actor; callers hand payloads and control
//! frames over bounded queues and observe the lifecycle through the state
//! machine's waiters.

pub mod control;
pub(crate) mod io;
pub mod state;

use std::{
    net::SocketAddr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ConnectError, SendError},
    frame::Frame,
    handler::ChannelHandler,
};
use control::ControlKind;
use state::StateMachine;

/// Unique identifier of a channel within a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId(u32);

impl StreamId {
    /// Create a new `StreamId` with the provided value.
    #[must_use]
    pub fn new(id: u32) -> Self { Self(id) }

    /// Return the inner `u32` representation.
    #[must_use]
    pub fn as_u32(&self) -> u32 { self.0 }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

/// Monotonic nanosecond clock anchored at the owning pool's start.
///
/// Built on `tokio::time::Instant` so paused-clock tests drive the
/// pooling timestamps deterministically.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Clock {
    epoch: tokio::time::Instant,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }

    pub(crate) fn now(&self) -> u64 { self.epoch.elapsed().as_nanos() as u64 }
}

/// Receiver ends of a channel's outbound queues, owned by the actor.
pub(crate) struct ChannelQueues {
    pub(crate) data_rx: mpsc::Receiver<Bytes>,
    pub(crate) control_rx: mpsc::Receiver<Frame>,
}

/// One TCP connection plus its framing and state-machine wrapper.
pub struct Channel {
    id: StreamId,
    remote: SocketAddr,
    state: StateMachine,
    handler: Arc<dyn ChannelHandler>,
    data_tx: mpsc::Sender<Bytes>,
    control_tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
    connect_failure: OnceLock<ConnectError>,
    clock: Clock,
    references: AtomicUsize,
    last_used: AtomicU64,
    last_returned: AtomicU64,
    last_keep_alive: AtomicU64,
}

impl Channel {
    /// Create a not-yet-connected channel in the `Connecting` state.
    pub(crate) fn new(
        id: StreamId,
        remote: SocketAddr,
        handler: Arc<dyn ChannelHandler>,
        clock: Clock,
        data_queue_capacity: usize,
        control_queue_capacity: usize,
    ) -> (Arc<Self>, ChannelQueues) {
        let (data_tx, data_rx) = mpsc::channel(data_queue_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(control_queue_capacity.max(1));
        let channel = Arc::new(Self {
            id,
            remote,
            state: StateMachine::new(state::CONNECTING),
            handler,
            data_tx,
            control_tx,
            closed: CancellationToken::new(),
            connect_failure: OnceLock::new(),
            clock,
            references: AtomicUsize::new(0),
            last_used: AtomicU64::new(0),
            last_returned: AtomicU64::new(0),
            last_keep_alive: AtomicU64::new(0),
        });
        (channel, ChannelQueues { data_rx, control_rx })
    }

    /// Identifier of this channel within its pool.
    #[must_use]
    pub fn id(&self) -> StreamId { self.id }

    /// Remote address this channel connects to.
    #[must_use]
    pub fn remote(&self) -> SocketAddr { self.remote }

    /// Whether the channel is connected and registered for traffic.
    #[must_use]
    pub fn is_ready(&self) -> bool { self.state.is_in_any(state::READY) }

    /// Whether the connect has not yet completed.
    #[must_use]
    pub fn is_connecting(&self) -> bool { self.state.is_in_any(state::CONNECTING) }

    /// Whether the socket is connected but the channel not yet registered.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.state.is_in_any(state::CONNECTED) }

    /// Whether the channel has reached a terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.state.is_in_any(state::TERMINAL) }

    /// Hand an opaque payload to the actor for egress.
    ///
    /// Returns the number of bytes accepted: the payload length when the
    /// frame was queued, or `0` when the outbound queue is full and the
    /// caller should retry. On a closed channel this is a safe no-op
    /// returning [`SendError::Closed`].
    pub fn write(&self, payload: Bytes) -> Result<usize, SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let len = payload.len();
        match self.data_tx.try_send(payload) {
            Ok(()) => Ok(len),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(0),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Like [`write`](Self::write), but waits for queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] once the channel is terminal.
    pub async fn send(&self, payload: Bytes) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.data_tx
            .send(payload)
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Begin the graceful close handshake.
    ///
    /// Moves `Ready`/`Connected` to `CloseInitiated` and schedules a CLOSE
    /// control frame for egress. Returns `false` when the close was
    /// already underway (or the channel never became closable); the
    /// channel then proceeds on its existing path.
    pub fn initiate_close(&self) -> bool {
        let initiated = self
            .state
            .try_transition(state::READY | state::CONNECTED, state::CLOSE_INITIATED);
        if initiated && !self.schedule_control_frame(ControlKind::Close.frame()) {
            tracing::warn!(stream_id = %self.id, "control queue rejected CLOSE frame");
            self.close_unexpectedly();
        }
        initiated
    }

    /// Schedule a KEEP_ALIVE control frame.
    ///
    /// Liveness policy lives outside this layer; an external monitor calls
    /// this on whatever cadence it wants. Returns whether the frame was
    /// queued.
    pub fn send_keep_alive(&self) -> bool {
        !self.is_closed() && self.schedule_control_frame(ControlKind::KeepAlive.frame())
    }

    /// Register a one-shot waiter on the lifecycle.
    ///
    /// The callback fires exactly once with the reached state, as soon as
    /// the state intersects `target_mask` or `failure_mask` — immediately
    /// if it already does.
    pub fn listen_for(
        &self,
        target_mask: u32,
        failure_mask: u32,
        callback: impl FnOnce(u32) + Send + 'static,
    ) {
        self.state.listen(target_mask, failure_mask, callback);
    }

    /// Timestamp of the last received keep-alive, in nanoseconds since the
    /// owning pool started; `0` when none arrived yet.
    #[must_use]
    pub fn last_keep_alive(&self) -> u64 { self.last_keep_alive.load(Ordering::Acquire) }

    pub(crate) fn handler(&self) -> &Arc<dyn ChannelHandler> { &self.handler }

    pub(crate) fn state(&self) -> &StateMachine { &self.state }

    pub(crate) fn closed_token(&self) -> &CancellationToken { &self.closed }

    pub(crate) fn schedule_control_frame(&self, frame: Frame) -> bool {
        self.control_tx.try_send(frame).is_ok()
    }

    pub(crate) fn mark_connected(&self) -> bool {
        self.state.try_transition(state::CONNECTING, state::CONNECTED)
    }

    pub(crate) fn mark_ready(&self) -> bool {
        self.state.try_transition(state::CONNECTED, state::READY)
    }

    /// Graceful shutdown sequence completed.
    pub(crate) fn close_expectedly(&self) {
        self.state.transition(state::CLOSED);
        self.closed.cancel();
    }

    /// I/O failure, peer reset, or failed connect.
    pub(crate) fn close_unexpectedly(&self) {
        self.state.transition(state::CLOSED_UNEXPECTEDLY);
        self.closed.cancel();
    }

    /// Drive the channel towards a terminal state, whatever it is doing.
    ///
    /// Used by pool teardown: an active channel gets the graceful
    /// handshake, an unfinished connect is cut short so no waiter is left
    /// pending. Channels already closing are left to finish.
    pub(crate) fn shutdown(&self) {
        loop {
            if self.initiate_close()
                || self
                    .state
                    .is_in_any(state::CLOSE_INITIATED | state::CLOSE_RECEIVED | state::TERMINAL)
            {
                return;
            }
            // Still connecting: fail the connect rather than wait for it.
            if self
                .state
                .try_transition(state::CONNECTING, state::CLOSED_UNEXPECTEDLY)
            {
                self.closed.cancel();
                return;
            }
        }
    }

    pub(crate) fn record_connect_failure(&self, error: ConnectError) {
        let _ = self.connect_failure.set(error);
    }

    /// Cause to report when the channel died before becoming ready.
    pub(crate) fn connect_failure(&self) -> ConnectError {
        self.connect_failure
            .get()
            .cloned()
            .unwrap_or(ConnectError::ChannelClosed {
                state: state::state_name(self.state.current()),
            })
    }

    // Pool accounting. The reference count marks in-use channels; the
    // timestamps order eviction candidates.

    pub(crate) fn acquire(&self) {
        self.references.fetch_add(1, Ordering::AcqRel);
        self.last_used.store(self.clock.now(), Ordering::Release);
    }

    pub(crate) fn release(&self) {
        let now = self.clock.now();
        let _ = self
            .references
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                Some(refs.saturating_sub(1))
            });
        self.last_used.store(now, Ordering::Release);
        self.last_returned.store(now, Ordering::Release);
    }

    /// Whether any logical owner still holds this channel.
    #[must_use]
    pub fn is_in_use(&self) -> bool { self.references.load(Ordering::Acquire) > 0 }

    pub(crate) fn last_returned(&self) -> u64 { self.last_returned.load(Ordering::Acquire) }

    pub(crate) fn stamp_keep_alive(&self) {
        self.last_keep_alive.store(self.clock.now(), Ordering::Release);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("state", &state::state_name(self.state.current()))
            .finish_non_exhaustive()
    }
}
