//! Address-keyed channel pool with soft-capacity eviction.
//!
//! The pool hands out one channel per remote address, reusing a ready
//! channel for as long as it lives. Capacity is a soft target: when it is
//! reached the least recently *returned* unreferenced channel is evicted
//! asynchronously, and if every channel is in use the pool simply grows —
//! no request is ever rejected for capacity reasons.
//!
//! Bookkeeping (the address index and eviction ordering) is guarded by one
//! lock and touched from arbitrary caller tasks; connects, closes, and
//! writes are handed off to the per-channel actor tasks, so callers never
//! block on socket syscalls.

mod future;

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, atomic::AtomicU32, atomic::Ordering},
};

pub use future::PooledFuture;
use tokio::sync::oneshot;

use crate::{
    channel::{Channel, Clock, StreamId, io, state},
    connector::{Connector, TcpConnector},
    error::ConnectError,
    frame::{DEFAULT_MAX_FRAME_LENGTH, clamp_frame_length},
    handler::{ChannelHandler, NullChannelHandler},
    registry::ChannelRegistry,
};

/// Soft capacity used when none is configured.
pub const DEFAULT_CAPACITY: usize = 32;

const DEFAULT_DATA_QUEUE_CAPACITY: usize = 64;
const DEFAULT_CONTROL_QUEUE_CAPACITY: usize = 16;

/// Client-side registry reusing channels per remote address.
pub struct ChannelPool<C: Connector = TcpConnector> {
    capacity: usize,
    max_frame_length: usize,
    data_queue_capacity: usize,
    control_queue_capacity: usize,
    connector: Arc<C>,
    handler: Arc<dyn ChannelHandler>,
    clock: Clock,
    next_stream_id: AtomicU32,
    index: Mutex<HashMap<SocketAddr, Arc<Channel>>>,
    registry: ChannelRegistry,
}

impl ChannelPool<TcpConnector> {
    /// Start building a pool over plain TCP.
    #[must_use]
    pub fn builder() -> ChannelPoolBuilder<TcpConnector> { ChannelPoolBuilder::new() }
}

impl<C: Connector> ChannelPool<C> {
    /// Acquire a channel for `addr`, waiting until it is ready.
    ///
    /// Sequential calls without an intervening close return the identical
    /// channel instance with its reference count incremented. This
    /// convenience blocks only on the pooled future, never on raw I/O.
    ///
    /// # Errors
    ///
    /// Returns the [`ConnectError`] the underlying request failed with.
    pub async fn request_channel(&self, addr: SocketAddr) -> Result<Arc<Channel>, ConnectError> {
        self.request_channel_async(addr).await_resolved().await
    }

    /// Acquire a channel for `addr` without blocking.
    ///
    /// The returned future is settled from the channel's lifecycle waiter
    /// once the channel is ready or has failed. Exactly one connect per
    /// address may be in flight: a concurrent request for the same address
    /// fails immediately with [`ConnectError::InFlight`] instead of
    /// queueing.
    pub fn request_channel_async(&self, addr: SocketAddr) -> PooledFuture {
        let mut index = self.index.lock().expect("pool index lock poisoned");

        if let Some(existing) = index.get(&addr) {
            if existing.is_ready() {
                existing.acquire();
                return PooledFuture::resolved_with(Arc::clone(existing));
            }
            if !existing.is_closed() {
                // Connecting or mid-close: fail fast rather than queue.
                return PooledFuture::failed_with(ConnectError::InFlight(addr));
            }
            // Terminal: fall through and replace the entry.
        }

        self.evict_if_at_capacity(&mut index);
        let channel = self.open_channel(addr, &mut index);
        // Count the requester before the lock drops so a concurrent
        // request can never select this channel as an eviction victim
        // while its connect is still in flight.
        channel.acquire();
        drop(index);

        let future = PooledFuture::pending();
        let resolver = future.clone();
        let pending = Arc::clone(&channel);
        channel.listen_for(state::READY, state::TERMINAL, move |reached| {
            if reached & state::READY != 0 {
                resolver.resolve(pending);
            } else {
                resolver.fail(pending.connect_failure());
            }
        });
        future
    }

    /// Hand a channel back to the pool.
    ///
    /// Decrements the reference count and stamps `last_returned`, making
    /// the channel eligible for eviction. `None` is a safe no-op.
    pub fn return_channel(&self, channel: Option<&Arc<Channel>>) {
        if let Some(channel) = channel {
            channel.release();
        }
    }

    /// Initiate close on every managed channel.
    ///
    /// Unfinished connects are cut short so no outstanding future is left
    /// pending. The returned future resolves only once every channel has
    /// reached a terminal state.
    pub fn close_all_channels_async(&self) -> impl Future<Output = ()> + Send + 'static + use<C> {
        let channels = self.registry.live();
        log::info!("closing {} transport channels", channels.len());
        let mut settled = Vec::with_capacity(channels.len());
        for channel in channels {
            channel.shutdown();
            let (tx, rx) = oneshot::channel();
            channel.listen_for(state::TERMINAL, 0, move |_| {
                let _ = tx.send(());
            });
            settled.push(rx);
        }
        async move {
            let _ = futures::future::join_all(settled).await;
        }
    }

    /// Number of live (non-terminal) channels currently indexed.
    #[must_use]
    pub fn live_channel_count(&self) -> usize {
        self.index
            .lock()
            .expect("pool index lock poisoned")
            .values()
            .filter(|channel| !channel.is_closed())
            .count()
    }

    /// Look up a live channel by stream id.
    #[must_use]
    pub fn channel_by_id(&self, id: &StreamId) -> Option<Arc<Channel>> { self.registry.get(id) }

    fn open_channel(
        &self,
        addr: SocketAddr,
        index: &mut HashMap<SocketAddr, Arc<Channel>>,
    ) -> Arc<Channel> {
        let id = StreamId::new(self.next_stream_id.fetch_add(1, Ordering::Relaxed));
        let (channel, queues) = Channel::new(
            id,
            addr,
            Arc::clone(&self.handler),
            self.clock,
            self.data_queue_capacity,
            self.control_queue_capacity,
        );

        // Index before the connect resolves so concurrent requests for the
        // same address observe the in-flight attempt.
        index.insert(addr, Arc::clone(&channel));
        self.registry.insert(&channel);

        io::spawn_client_channel(
            Arc::clone(&channel),
            queues,
            Arc::clone(&self.connector),
            self.max_frame_length,
        );
        channel
    }

    fn evict_if_at_capacity(&self, index: &mut HashMap<SocketAddr, Arc<Channel>>) {
        index.retain(|_, channel| !channel.is_closed());
        if index.len() < self.capacity {
            return;
        }

        let victim = index
            .iter()
            .filter(|(_, channel)| !channel.is_in_use())
            .min_by_key(|(_, channel)| channel.last_returned())
            .map(|(addr, _)| *addr);

        match victim {
            Some(addr) => {
                if let Some(channel) = index.remove(&addr) {
                    tracing::debug!(
                        stream_id = %channel.id(),
                        remote = %addr,
                        "evicting least recently returned channel"
                    );
                    // Close asynchronously; the new connect does not wait.
                    channel.shutdown();
                }
            }
            None => {
                // Soft capacity: every channel is in use, so grow instead
                // of rejecting the request.
                tracing::debug!(capacity = self.capacity, "pool at capacity, growing");
            }
        }
    }
}

impl Default for ChannelPool<TcpConnector> {
    fn default() -> Self { Self::builder().build() }
}

impl<C: Connector> std::fmt::Debug for ChannelPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("capacity", &self.capacity)
            .field("live_channels", &self.live_channel_count())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ChannelPool`].
///
/// ```no_run
/// use wirepool::pool::ChannelPool;
///
/// let pool = ChannelPool::builder().capacity(8).build();
/// # drop(pool);
/// ```
pub struct ChannelPoolBuilder<C: Connector = TcpConnector> {
    capacity: usize,
    max_frame_length: usize,
    data_queue_capacity: usize,
    control_queue_capacity: usize,
    handler: Arc<dyn ChannelHandler>,
    connector: C,
}

impl ChannelPoolBuilder<TcpConnector> {
    /// Builder with TCP transport and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            data_queue_capacity: DEFAULT_DATA_QUEUE_CAPACITY,
            control_queue_capacity: DEFAULT_CONTROL_QUEUE_CAPACITY,
            handler: Arc::new(NullChannelHandler),
            connector: TcpConnector,
        }
    }
}

impl Default for ChannelPoolBuilder<TcpConnector> {
    fn default() -> Self { Self::new() }
}

impl<C: Connector> ChannelPoolBuilder<C> {
    /// Soft capacity bound; growth past it is permitted when every channel
    /// is in use.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Maximum accepted frame payload length.
    #[must_use]
    pub fn max_frame_length(mut self, limit: usize) -> Self {
        self.max_frame_length = clamp_frame_length(limit);
        self
    }

    /// Capacity of each channel's outbound data queue.
    #[must_use]
    pub fn data_queue_capacity(mut self, capacity: usize) -> Self {
        self.data_queue_capacity = capacity.max(1);
        self
    }

    /// Capacity of each channel's outbound control-frame queue.
    #[must_use]
    pub fn control_queue_capacity(mut self, capacity: usize) -> Self {
        self.control_queue_capacity = capacity.max(1);
        self
    }

    /// Handler shared with every channel the pool opens.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn ChannelHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Substitute the stream-establishment strategy.
    #[must_use]
    pub fn connector<D: Connector>(self, connector: D) -> ChannelPoolBuilder<D> {
        ChannelPoolBuilder {
            capacity: self.capacity,
            max_frame_length: self.max_frame_length,
            data_queue_capacity: self.data_queue_capacity,
            control_queue_capacity: self.control_queue_capacity,
            handler: self.handler,
            connector,
        }
    }

    /// Finish the pool.
    #[must_use]
    pub fn build(self) -> ChannelPool<C> {
        ChannelPool {
            capacity: self.capacity,
            max_frame_length: self.max_frame_length,
            data_queue_capacity: self.data_queue_capacity,
            control_queue_capacity: self.control_queue_capacity,
            connector: Arc::new(self.connector),
            handler: self.handler,
            clock: Clock::new(),
            next_stream_id: AtomicU32::new(0),
            index: Mutex::new(HashMap::new()),
            registry: ChannelRegistry::default(),
        }
    }
}
