//! Length-prefixed, alignment-padded frame codec.
//!
//! Every unit on the wire is `length:u32 | kind:u16 | payload | padding`,
//! big-endian, where `length` is the exact payload byte count and the
//! whole frame occupies [`aligned_length`]`(length)` bytes. Padding bytes
//! are written as zero and carry no meaning on read.
//!
//! [`TransportCodec`] decodes from an accumulating buffer: a frame is
//! never produced until all of its aligned bytes are buffered, and
//! consuming one advances the buffer so the next socket read appends at a
//! known offset.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Bytes occupied by the `length` and `kind` header fields.
pub const HEADER_SIZE: usize = 6;

/// Frames are padded out to a multiple of this boundary.
pub const FRAME_ALIGNMENT: usize = 8;

/// Wire value of the [`FrameKind::Message`] discriminant.
pub const KIND_MESSAGE: u16 = 0x00;

/// Wire value of the [`FrameKind::Control`] discriminant.
pub const KIND_CONTROL: u16 = 0x01;

/// Smallest accepted payload limit.
///
/// Limits passed to [`TransportCodec::new`] are clamped to at least this
/// value so control frames always fit.
pub const MIN_FRAME_LENGTH: usize = 64;

/// Largest accepted payload limit (16 MiB).
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Payload limit used when none is configured.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Total wire footprint of a frame carrying `payload_len` payload bytes.
#[must_use]
pub const fn aligned_length(payload_len: usize) -> usize {
    (HEADER_SIZE + payload_len).next_multiple_of(FRAME_ALIGNMENT)
}

pub(crate) fn clamp_frame_length(value: usize) -> usize {
    value.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH)
}

/// Discriminant carried in the frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Opaque user payload, dispatched to the channel handler.
    Message,
    /// Protocol-management frame carrying a control sub-kind.
    Control,
    /// A kind this layer does not recognise; discarded after a warning.
    Unknown(u16),
}

impl FrameKind {
    #[must_use]
    pub(crate) fn from_wire(raw: u16) -> Self {
        match raw {
            KIND_MESSAGE => Self::Message,
            KIND_CONTROL => Self::Control,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub(crate) fn to_wire(self) -> u16 {
        match self {
            Self::Message => KIND_MESSAGE,
            Self::Control => KIND_CONTROL,
            Self::Unknown(raw) => raw,
        }
    }
}

/// One decoded unit from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Header discriminant.
    pub kind: FrameKind,
    /// Exact payload bytes, padding stripped.
    pub payload: Bytes,
}

impl Frame {
    /// Wrap an opaque payload into a `Message` frame.
    #[must_use]
    pub fn message(payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Message,
            payload,
        }
    }

    /// Wrap a control payload into a `Control` frame.
    #[must_use]
    pub fn control(payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Control,
            payload,
        }
    }

    /// Bytes this frame occupies on the wire, padding included.
    #[must_use]
    pub fn encoded_length(&self) -> usize { aligned_length(self.payload.len()) }
}

/// Codec for the aligned transport frame format.
#[derive(Clone, Debug)]
pub struct TransportCodec {
    max_frame_length: usize,
}

impl TransportCodec {
    /// Construct a codec with a maximum payload length.
    ///
    /// The limit is clamped to `MIN_FRAME_LENGTH..=MAX_FRAME_LENGTH`.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: clamp_frame_length(max_frame_length),
        }
    }

    /// The maximum payload length this codec will accept.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }

    fn peek_payload_length(&self, src: &[u8]) -> io::Result<usize> {
        let announced = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if announced > self.max_frame_length {
            return Err(ProtocolError::OversizedFrame {
                size: announced,
                max: self.max_frame_length,
            }
            .into());
        }
        Ok(announced)
    }
}

impl Default for TransportCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_FRAME_LENGTH) }
}

impl Decoder for TransportCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Frame>> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        let payload_len = self.peek_payload_length(src)?;
        let frame_len = aligned_length(payload_len);
        if src.len() < frame_len {
            // Partial frame: wait until all aligned bytes are buffered.
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let kind = FrameKind::from_wire(u16::from_be_bytes([src[4], src[5]]));
        let mut frame = src.split_to(frame_len);
        frame.advance(HEADER_SIZE);
        frame.truncate(payload_len);
        Ok(Some(Frame {
            kind,
            payload: frame.freeze(),
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection closed with {} trailing bytes mid-frame", src.len()),
            )),
        }
    }
}

impl Encoder<Frame> for TransportCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> io::Result<()> {
        let payload_len = frame.payload.len();
        if payload_len > self.max_frame_length {
            return Err(ProtocolError::OversizedFrame {
                size: payload_len,
                max: self.max_frame_length,
            }
            .into());
        }

        let frame_len = aligned_length(payload_len);
        dst.reserve(frame_len);
        dst.put_u32(payload_len as u32);
        dst.put_u16(frame.kind.to_wire());
        dst.put_slice(&frame.payload);
        dst.put_bytes(0, frame_len - HEADER_SIZE - payload_len);
        Ok(())
    }
}
