//! CLOSE / END_OF_STREAM / KEEP_ALIVE sub-protocol.
//!
//! Control frames share the data channel: they are ordinary frames of kind
//! `Control` whose payload opens with a big-endian `u16` sub-kind. The
//! canonical frames are pre-encoded statics since none carries any further
//! payload.

use bytes::Bytes;

use crate::{error::ProtocolError, frame::Frame};

/// Wire value of the CLOSE sub-kind.
pub const CONTROL_CLOSE: u16 = 0x00;

/// Wire value of the END_OF_STREAM sub-kind.
pub const CONTROL_END_OF_STREAM: u16 = 0x01;

/// Wire value of the KEEP_ALIVE sub-kind.
pub const CONTROL_KEEP_ALIVE: u16 = 0x02;

const CLOSE_PAYLOAD: [u8; 2] = CONTROL_CLOSE.to_be_bytes();
const END_OF_STREAM_PAYLOAD: [u8; 2] = CONTROL_END_OF_STREAM.to_be_bytes();
const KEEP_ALIVE_PAYLOAD: [u8; 2] = CONTROL_KEEP_ALIVE.to_be_bytes();

/// Sub-kind carried by a `Control` frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKind {
    /// Close handshake initiation.
    Close,
    /// Close handshake acknowledgement; the receiver may drop the socket.
    EndOfStream,
    /// Liveness ping; never changes connection state.
    KeepAlive,
}

impl ControlKind {
    /// Parse the sub-kind out of a control frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TruncatedControlFrame`] when the payload
    /// cannot hold a discriminant and
    /// [`ProtocolError::UnknownControlKind`] for unrecognised values; the
    /// caller logs and discards either way, leaving connection state
    /// untouched.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let Some(raw) = payload.first_chunk::<2>() else {
            return Err(ProtocolError::TruncatedControlFrame(payload.len()));
        };
        match u16::from_be_bytes(*raw) {
            CONTROL_CLOSE => Ok(Self::Close),
            CONTROL_END_OF_STREAM => Ok(Self::EndOfStream),
            CONTROL_KEEP_ALIVE => Ok(Self::KeepAlive),
            other => Err(ProtocolError::UnknownControlKind(other)),
        }
    }

    /// The canonical pre-encoded frame for this sub-kind.
    #[must_use]
    pub fn frame(self) -> Frame {
        let payload = match self {
            Self::Close => Bytes::from_static(&CLOSE_PAYLOAD),
            Self::EndOfStream => Bytes::from_static(&END_OF_STREAM_PAYLOAD),
            Self::KeepAlive => Bytes::from_static(&KEEP_ALIVE_PAYLOAD),
        };
        Frame::control(payload)
    }
}
