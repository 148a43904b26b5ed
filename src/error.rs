//! Error types for the transport channel layer.
//!
//! The taxonomy mirrors the three ways this layer can fail: a pooled
//! connection request never produced a ready channel ([`ConnectError`]), a
//! write was attempted on a channel past its useful life ([`SendError`]),
//! or a peer violated the wire protocol ([`ProtocolError`]).

use std::{io, net::SocketAddr};

/// Errors surfaced when a pooled channel request cannot produce a ready
/// channel.
///
/// The async acquisition path stores this inside the
/// [`PooledFuture`](crate::pool::PooledFuture); the awaiting convenience
/// path returns it directly. Cloneable so a failed future can be polled
/// more than once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The connect attempt itself failed.
    #[error("failed to connect to {addr}: {kind}")]
    Io {
        /// Remote address the connect was aimed at.
        addr: SocketAddr,
        /// Kind of the underlying I/O error.
        kind: io::ErrorKind,
    },
    /// Another request for the same address is still unresolved.
    ///
    /// The pool permits exactly one in-flight connect per address;
    /// concurrent requests fail immediately rather than queue.
    #[error("a channel request for {0} is already in flight")]
    InFlight(SocketAddr),
    /// The channel reached a terminal state before becoming ready.
    #[error("channel closed in state {state} before becoming ready")]
    ChannelClosed {
        /// Name of the terminal state that was reached.
        state: &'static str,
    },
}

/// Sentinel returned by write operations on a closed channel.
///
/// Writing to a channel in a terminal state is a safe no-op that yields
/// this value; it never panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The channel is in a terminal state and accepts no further frames.
    #[error("channel is closed")]
    Closed,
}

/// Violations of the wire protocol detected while decoding.
///
/// Oversized and truncated frames terminate the connection via the codec's
/// `io::Error` conversion; an unknown control sub-kind is logged and the
/// frame discarded without touching connection state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The length header announced a payload beyond the configured limit.
    #[error("frame payload of {size} bytes exceeds the {max} byte limit")]
    OversizedFrame {
        /// Announced payload length.
        size: usize,
        /// Configured maximum payload length.
        max: usize,
    },
    /// A control frame payload too short to carry a sub-kind discriminant.
    #[error("control frame payload of {0} bytes is too short for a sub-kind")]
    TruncatedControlFrame(usize),
    /// A control sub-kind this layer does not recognise.
    #[error("unknown control sub-kind {0:#06x}")]
    UnknownControlKind(u16),
}

impl From<ProtocolError> for io::Error {
    fn from(error: ProtocolError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, error)
    }
}
