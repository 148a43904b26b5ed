//! Stream establishment for client channels.
//!
//! The pool is generic over a [`Connector`] so tests can substitute
//! in-memory streams for real sockets; [`TcpConnector`] is the default.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

/// Establishes the byte stream a new channel will own.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Stream type handed to the channel's actor task.
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Connect to `addr`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; the pool records it and fails the
    /// pending channel request.
    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Stream>;
}

/// Default connector opening TCP sockets with `TCP_NODELAY` set.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
