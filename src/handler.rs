//! Callback interface a channel dispatches inbound events to.
//!
//! The handler is shared between a channel and its creator; the channel
//! invokes it from its actor task, in wire order, one frame at a time.
//! All methods default to no-ops so implementations opt into the events
//! they care about.

use bytes::Bytes;

/// Receives the events a channel produces while it is alive.
pub trait ChannelHandler: Send + Sync + 'static {
    /// A fully buffered `Message` frame arrived.
    fn on_receive(&self, _payload: Bytes) {}

    /// A control frame with a sub-kind this layer does not handle itself.
    ///
    /// The raw control payload is passed through so layered protocols can
    /// define their own sub-kinds; the connection state is unaffected.
    fn on_control_frame(&self, _raw: Bytes) {}

    /// The peer sent a keep-alive.
    fn on_keep_alive(&self) {}

    /// A queued payload could not be written to the socket.
    ///
    /// The channel transitions to `ClosedUnexpectedly` after this returns.
    fn on_send_error(&self, _failed: Bytes) {}
}

/// Handler that drops every event, logging at trace level.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullChannelHandler;

impl ChannelHandler for NullChannelHandler {
    fn on_receive(&self, payload: Bytes) {
        tracing::trace!(len = payload.len(), "dropping message frame without a consumer");
    }

    fn on_control_frame(&self, raw: Bytes) {
        tracing::trace!(len = raw.len(), "dropping unhandled control frame");
    }

    fn on_send_error(&self, failed: Bytes) {
        tracing::trace!(len = failed.len(), "discarding unsendable payload");
    }
}
