//! # Transport Module
//!
//! Non-blocking WebSocket transport abstraction.
//!
//! Every call returns immediately. Connection progress, inbound frames and
//! failures are reported later as [`TransportEvent`]s drained with
//! [`Transport::poll_event`] on each scheduler tick.

pub mod websocket;

pub use websocket::WsTransport;

use crate::error::Result;

/// Something the transport observed since the last poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection attempt completed
    Connected,
    /// Frame received from the server
    Message(Vec<u8>),
    /// Server or network closed the connection
    Disconnected,
    /// Connection attempt or established connection failed
    Error(String),
}

/// Non-blocking WebSocket client capability
pub trait Transport {
    /// Begin connecting to `url`
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::TransportConnect`](crate::error::ForwarderError::TransportConnect)
    /// if the attempt could not even be started. Failures after that point
    /// arrive as [`TransportEvent::Error`].
    fn connect(&mut self, url: &str) -> Result<()>;

    /// Hand a frame to the transport for delivery
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::TransportBusy`](crate::error::ForwarderError::TransportBusy)
    /// if the connection is fine but its outbound buffer is full, and
    /// [`ForwarderError::TransportSend`](crate::error::ForwarderError::TransportSend)
    /// if there is no open connection.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Next pending event, if any
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Close the connection and discard any undelivered events
    fn close(&mut self);
}
