//! Shared fixtures for the in-crate unit tests.
//!
//! `MockConnector` swaps real sockets for in-memory duplex streams with a
//! scripted peer on the far end, so channel and pool behaviour can be
//! exercised deterministically, including under a paused clock.

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{
    io::DuplexStream,
    sync::{mpsc, oneshot},
};
use tokio_util::codec::Framed;

use crate::{
    channel::{Channel, control::ControlKind},
    connector::Connector,
    frame::{Frame, FrameKind, TransportCodec},
    handler::ChannelHandler,
};

/// Parse a test address.
pub(crate) fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
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
pub(crate) async fn wait_for_state(channel: &Arc<Channel>, mask: u32) -> u32 {
    let (tx, rx) = oneshot::channel();
    channel.listen_for(mask, 0, move |state| {
        let _ = tx.send(state);
    });
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("state not reached in time")
        .expect("state waiter dropped")
}

enum PeerCommand {
    Frame(Frame),
    Disconnect,
}

/// Far end of a mock connection.
///
/// Records every frame the channel under test writes and can inject
/// frames towards it. Dropping the handle leaves the peer task running
/// until the stream closes.
#[derive(Clone)]
pub(crate) struct PeerHandle {
    received: Arc<Mutex<Vec<Frame>>>,
    outbound: mpsc::UnboundedSender<PeerCommand>,
}

impl PeerHandle {
    pub(crate) fn received(&self) -> Vec<Frame> {
        self.received.lock().expect("peer log lock poisoned").clone()
    }

    pub(crate) fn received_control(&self, kind: ControlKind) -> usize {
        self.received()
            .iter()
            .filter(|frame| {
                frame.kind == FrameKind::Control && ControlKind::parse(&frame.payload) == Ok(kind)
            })
            .count()
    }

    pub(crate) fn send(&self, frame: Frame) {
        self.outbound
            .send(PeerCommand::Frame(frame))
            .expect("peer task gone");
    }

    /// Drop the peer's end of the stream, surfacing EOF to the channel.
    pub(crate) fn disconnect(&self) {
        self.outbound
            .send(PeerCommand::Disconnect)
            .expect("peer task gone");
    }
}

/// Spawn a protocol-speaking peer over `stream`.
///
/// The peer answers CLOSE with END_OF_STREAM and logs everything else.
pub(crate) fn spawn_protocol_peer(stream: DuplexStream) -> PeerHandle {
    let received = Arc::new(Mutex::new(Vec::new()));
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<PeerCommand>();
    let log = Arc::clone(&received);

    tokio::spawn(async move {
        let mut framed = Framed::new(stream, TransportCodec::default());
        let mut sender_open = true;
        loop {
            tokio::select! {
                inbound = framed.next() => match inbound {
                    Some(Ok(frame)) => {
                        let close = frame.kind == FrameKind::Control
                            && ControlKind::parse(&frame.payload) == Ok(ControlKind::Close);
                        log.lock().expect("peer log lock poisoned").push(frame);
                        if close && framed.send(ControlKind::EndOfStream.frame()).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                },
                command = outbound_rx.recv(), if sender_open => match command {
                    Some(PeerCommand::Frame(frame)) => {
                        if framed.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(PeerCommand::Disconnect) => break,
                    None => sender_open = false,
                },
            }
        }
    });

    PeerHandle {
        received,
        outbound: outbound_tx,
    }
}

enum ConnectBehavior {
    /// Hand out a duplex stream with a protocol peer on the far end.
    Peer,
    /// Fail the connect immediately.
    Refused,
    /// Never complete the connect.
    Hang,
}

/// Connector backed by in-memory duplex streams.
///
/// Clones share state, so a test can keep a handle while the pool owns
/// another.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    behaviors: Mutex<HashMap<SocketAddr, ConnectBehavior>>,
    peers: Mutex<HashMap<SocketAddr, PeerHandle>>,
}

impl MockConnector {
    pub(crate) fn refuse(&self, addr: SocketAddr) {
        self.inner
            .behaviors
            .lock()
            .expect("behavior lock poisoned")
            .insert(addr, ConnectBehavior::Refused);
    }

    pub(crate) fn hang(&self, addr: SocketAddr) {
        self.inner
            .behaviors
            .lock()
            .expect("behavior lock poisoned")
            .insert(addr, ConnectBehavior::Hang);
    }

    /// Handle to the most recent peer spawned for `addr`.
    pub(crate) fn peer(&self, addr: SocketAddr) -> PeerHandle {
        self.inner
            .peers
            .lock()
            .expect("peer map lock poisoned")
            .get(&addr)
            .cloned()
            .expect("no connect happened for this address")
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Stream = DuplexStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<DuplexStream> {
        let hang = {
            let behaviors = self.inner.behaviors.lock().expect("behavior lock poisoned");
            match behaviors.get(&addr) {
                Some(ConnectBehavior::Refused) => {
                    return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
                }
                Some(ConnectBehavior::Hang) => true,
                Some(ConnectBehavior::Peer) | None => false,
            }
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let (local, remote) = tokio::io::duplex(64 * 1024);
        let handle = spawn_protocol_peer(remote);
        self.inner
            .peers
            .lock()
            .expect("peer map lock poisoned")
            .insert(addr, handle);
        Ok(local)
    }
}

/// Events a [`RecordingHandler`] observed, in dispatch order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum HandlerEvent {
    Receive(Bytes),
    Control(Bytes),
    KeepAlive,
    SendError(Bytes),
}

/// Handler that forwards every callback into an unbounded queue.
pub(crate) struct RecordingHandler {
    events: mpsc::UnboundedSender<HandlerEvent>,
}

impl RecordingHandler {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HandlerEvent>) {
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
pub(crate) async fn next_event(
    events: &mut mpsc::UnboundedReceiver<HandlerEvent>,
) -> HandlerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no handler event in time")
        .expect("handler dropped")
}
