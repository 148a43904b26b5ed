//! Shared helpers for the integration tests.
//!
//! `TestServer` binds a real TCP listener speaking the transport frame
//! protocol: message frames are echoed back, CLOSE is answered with
//! END_OF_STREAM, and keep-alives are absorbed.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
};
use tokio_util::codec::Framed;

use wirepool::{
    Channel, ChannelHandler, ControlKind, Frame, FrameKind, TransportCodec, channel::state,
};

/// Protocol-speaking echo server bound to an ephemeral port.
pub struct TestServer {
    addr: SocketAddr,
}

impl TestServer {
    /// Bind a listener and start accepting connections.
    pub async fn bind() -> Self {
        // Surfaces transport traces under RUST_LOG; first caller wins.
        let _ = tracing_subscriber::fmt::try_init();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener");
        let addr = listener.local_addr().expect("listener has no local addr");

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream));
            }
        });

        Self { addr }
    }

    /// Address clients connect to.
    #[must_use]
    pub fn addr(&self) -> SocketAddr { self.addr }
}

/// Bind and immediately release a port, yielding an address nothing
/// listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind probe listener");
    listener.local_addr().expect("listener has no local addr")
}

async fn serve_connection(stream: TcpStream) {
    let mut framed = Framed::new(stream, TransportCodec::default());
    while let Some(Ok(frame)) = framed.next().await {
        let reply = match frame.kind {
            FrameKind::Message => Some(Frame::message(frame.payload)),
            FrameKind::Control => match ControlKind::parse(&frame.payload) {
                Ok(ControlKind::Close) => Some(ControlKind::EndOfStream.frame()),
                _ => None,
            },
            FrameKind::Unknown(_) => None,
        };
        if let Some(reply) = reply {
            if framed.send(reply).await.is_err() {
                break;
            }
        }
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Wait until the channel state intersects `mask`, returning the state
/// that fired the waiter.
pub async fn wait_for_state(channel: &Arc<Channel>, mask: u32) -> u32 {
    let (tx, rx) = oneshot::channel();
    channel.listen_for(mask, 0, move |reached| {
        let _ = tx.send(reached);
    });
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("state not reached in time")
        .expect("state waiter dropped")
}

/// Wait for the channel to reach a terminal state and return it.
pub async fn terminal_state(channel: &Arc<Channel>) -> u32 {
    wait_for_state(channel, state::TERMINAL).await
}

/// Events a [`RecordingHandler`] observed, in dispatch order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerEvent {
    Receive(Bytes),
    Control(Bytes),
    KeepAlive,
    SendError(Bytes),
}

/// Handler forwarding every callback into an unbounded queue.
pub struct RecordingHandler {
    events: mpsc::UnboundedSender<HandlerEvent>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HandlerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events: tx }), rx)
    }
}

impl ChannelHandler for RecordingHandler {
    fn on_receive(&self, payload: Bytes) {
        let _ = self.events.send(HandlerEvent::Receive(payload));
    }

    fn on_control_frame(&self, raw: Bytes) {
        let _ = self.events.send(HandlerEvent::Control(raw));
    }

    fn on_keep_alive(&self) {
        let _ = self.events.send(HandlerEvent::KeepAlive);
    }

    fn on_send_error(&self, failed: Bytes) {
        let _ = self.events.send(HandlerEvent::SendError(failed));
    }
}

/// Receive the next handler event, failing the test after five seconds.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<HandlerEvent>) -> HandlerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no handler event in time")
        .expect("handler dropped")
}
