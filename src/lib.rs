//! Public API for the `wirepool` library.
//!
//! This crate provides the client side of a framed TCP transport: a
//! length-prefixed, alignment-padded wire codec, per-connection lifecycle
//! channels driven by dedicated actor tasks, a CLOSE / END_OF_STREAM /
//! KEEP_ALIVE control sub-protocol, and an address-keyed channel pool with
//! soft-capacity eviction.

pub mod channel;
pub mod connector;
pub mod error;
pub mod frame;
pub mod handler;
pub mod pool;
pub mod registry;

pub use channel::{Channel, StreamId, control::ControlKind};
pub use connector::{Connector, TcpConnector};
pub use error::{ConnectError, ProtocolError, SendError};
pub use frame::{Frame, FrameKind, TransportCodec};
pub use handler::{ChannelHandler, NullChannelHandler};
pub use pool::{ChannelPool, ChannelPoolBuilder, PooledFuture};
pub use registry::ChannelRegistry;

#[cfg(test)]
mod test_support;
