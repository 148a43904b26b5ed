//! Socket-facing half of a channel.
//!
//! Exactly one actor task owns each socket: it is the sole performer of
//! reads and writes and the sole driver of I/O-induced state transitions,
//! so frame dispatch preserves wire order per channel. The actor polls the
//! closed token, the control queue, the data queue, and the socket with a
//! biased `tokio::select!` — control frames drain before data, and a CLOSE
//! is only acted on after the data frames buffered ahead of it have been
//! dispatched.

use std::{io, sync::Arc};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    connector::Connector,
    error::ConnectError,
    frame::{Frame, FrameKind, TransportCodec},
};

use super::{Channel, ChannelQueues, control::ControlKind, state};

/// Outcome of one turn of the actor's select loop.
enum Event {
    Closed,
    Control(Option<Frame>),
    Data(Option<bytes::Bytes>),
    Read(io::Result<usize>),
}

/// Drives connect, I/O, and teardown for one client channel.
///
/// Returns the spawned actor's join handle; the channel reaches a terminal
/// state before the task exits, whichever way it ends.
pub(crate) fn spawn_client_channel<C>(
    channel: Arc<Channel>,
    queues: ChannelQueues,
    connector: Arc<C>,
    max_frame_length: usize,
) -> tokio::task::JoinHandle<()>
where
    C: Connector,
{
    tokio::spawn(async move {
        let remote = channel.remote();
        let stream = tokio::select! {
            () = channel.closed_token().cancelled() => return,
            result = connector.connect(remote) => match result {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::warn!(stream_id = %channel.id(), %remote, %error, "connect failed");
                    channel.record_connect_failure(ConnectError::Io {
                        addr: remote,
                        kind: error.kind(),
                    });
                    channel.close_unexpectedly();
                    return;
                }
            },
        };

        if !channel.mark_connected() {
            // Torn down while the connect was in flight.
            return;
        }

        let io = ChannelIo::new(Arc::clone(&channel), queues, stream, max_frame_length);

        // Registration: the channel accepts traffic once its actor is
        // wired up. A concurrent close may already have moved it on.
        if !channel.mark_ready() && channel.is_closed() {
            return;
        }

        io.run().await;
    })
}

pub(crate) struct ChannelIo<S> {
    channel: Arc<Channel>,
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    codec: TransportCodec,
    queues: ChannelQueues,
}

impl<S> ChannelIo<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(crate) fn new(
        channel: Arc<Channel>,
        queues: ChannelQueues,
        stream: S,
        max_frame_length: usize,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            channel,
            reader,
            writer,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            codec: TransportCodec::new(max_frame_length),
            queues,
        }
    }

    /// Actor loop. Runs until the channel reaches a terminal state, then
    /// drops the socket.
    pub(crate) async fn run(mut self) {
        loop {
            if self.channel.is_closed() {
                break;
            }

            let event = tokio::select! {
                biased;
                () = self.channel.closed_token().cancelled() => Event::Closed,
                frame = self.queues.control_rx.recv() => Event::Control(frame),
                payload = self.queues.data_rx.recv() => Event::Data(payload),
                result = self.reader.read_buf(&mut self.read_buf) => Event::Read(result),
            };

            match event {
                Event::Closed => break,
                Event::Control(Some(frame)) => {
                    if let Err(error) = self.send_frame(frame).await {
                        tracing::warn!(
                            stream_id = %self.channel.id(),
                            %error,
                            "failed to write control frame"
                        );
                        self.channel.close_unexpectedly();
                        break;
                    }
                }
                Event::Data(Some(payload)) => {
                    let frame = Frame::message(payload.clone());
                    if let Err(error) = self.send_frame(frame).await {
                        tracing::warn!(
                            stream_id = %self.channel.id(),
                            %error,
                            "failed to write message frame"
                        );
                        self.channel.handler().on_send_error(payload);
                        self.channel.close_unexpectedly();
                        break;
                    }
                }
                Event::Control(None) | Event::Data(None) => {
                    // Every sender is gone; nothing can use this channel
                    // again.
                    self.channel.close_unexpectedly();
                    break;
                }
                Event::Read(result) => match self.receive(result) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(
                            stream_id = %self.channel.id(),
                            %error,
                            "read failed"
                        );
                        self.channel.close_unexpectedly();
                        break;
                    }
                },
            }
        }
    }

    /// Complete one read pass: classify EOF, then dispatch every fully
    /// buffered frame in wire order. `Ok(0)` is end of stream.
    fn receive(&mut self, read: io::Result<usize>) -> io::Result<usize> {
        let read = read?;
        if read == 0 {
            self.on_eof();
            return Ok(0);
        }
        self.dispatch_buffered()?;
        Ok(read)
    }

    fn dispatch_buffered(&mut self) -> io::Result<()> {
        while let Some(frame) = self.codec.decode(&mut self.read_buf)? {
            self.dispatch(frame);
            if self.channel.is_closed() {
                break;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, frame: Frame) {
        match frame.kind {
            FrameKind::Message => self.channel.handler().on_receive(frame.payload),
            FrameKind::Control => self.handle_control(frame.payload),
            FrameKind::Unknown(kind) => {
                tracing::warn!(
                    stream_id = %self.channel.id(),
                    kind,
                    "discarding frame of unknown kind"
                );
            }
        }
    }

    fn handle_control(&mut self, payload: bytes::Bytes) {
        match ControlKind::parse(&payload) {
            Ok(ControlKind::Close) => {
                // The compare-and-set replies END_OF_STREAM exactly once,
                // also under a simultaneous close.
                if self.channel.state().try_transition(
                    state::READY | state::CONNECTED | state::CLOSE_INITIATED,
                    state::CLOSE_RECEIVED,
                ) && !self
                    .channel
                    .schedule_control_frame(ControlKind::EndOfStream.frame())
                {
                    tracing::warn!(
                        stream_id = %self.channel.id(),
                        "control queue rejected END_OF_STREAM reply"
                    );
                    self.channel.close_unexpectedly();
                }
            }
            Ok(ControlKind::EndOfStream) => self.channel.close_expectedly(),
            Ok(ControlKind::KeepAlive) => {
                self.channel.stamp_keep_alive();
                self.channel.handler().on_keep_alive();
            }
            Err(error) => {
                // The codec already consumed the full aligned frame, so
                // the stream stays in sync; state is untouched.
                tracing::warn!(
                    stream_id = %self.channel.id(),
                    %error,
                    "ignoring unrecognised control frame"
                );
                self.channel.handler().on_control_frame(payload);
            }
        }
    }

    fn on_eof(&self) {
        if self
            .channel
            .state()
            .is_in_any(state::CONNECTED | state::READY)
        {
            tracing::debug!(stream_id = %self.channel.id(), "peer closed the stream unexpectedly");
            self.channel.close_unexpectedly();
        } else {
            self.channel.close_expectedly();
        }
    }

    async fn send_frame(&mut self, frame: Frame) -> io::Result<()> {
        self.write_buf.clear();
        self.codec.encode(frame, &mut self.write_buf)?;
        self.writer.write_all(&self.write_buf).await?;
        self.writer.flush().await
    }
}
