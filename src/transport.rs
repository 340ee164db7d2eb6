//! Transport abstraction consumed (and implemented) by the secure socket.
//!
//! A [`Transport`] is any byte or datagram channel with a connect/send/receive
//! lifecycle and a configurable receive timeout. The secure socket decorates
//! one transport instance and implements this trait itself, so decorated and
//! plain transports are interchangeable to callers.

use std::time::Duration;

use crate::Error;

/// Whether a transport delivers an ordered byte stream or discrete datagrams.
///
/// Stream transports are protected with TLS, datagram transports with DTLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stream,
    Datagram,
}

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No connection and no local binding.
    Closed,
    /// Bound locally but not connected to a peer.
    Bound,
    /// An active connect completed. The local side is the protocol client.
    Connected,
    /// A passive accept completed. The local side is the protocol server.
    Accepted,
}

/// Capability interface for transports.
///
/// The secure socket never bypasses these operations to touch raw transport
/// internals.
pub trait Transport {
    /// Stream or datagram semantics. Decides TLS vs DTLS.
    fn kind(&self) -> TransportKind;

    /// Current connection state.
    fn state(&self) -> TransportState;

    /// Establish a connection to the given host and port.
    fn connect(&mut self, host: &str, port: u16) -> Result<(), Error>;

    /// Send bytes, returning how many were accepted.
    fn send(&mut self, buffer: &[u8]) -> Result<usize, Error>;

    /// Receive bytes into `buffer`, returning how many were read.
    ///
    /// Blocks up to the configured receive timeout; expiry is reported as
    /// [`Error::Timeout`].
    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Error>;

    /// Close the connection. Closing an already closed transport is a no-op.
    fn close(&mut self) -> Result<(), Error>;

    /// Current receive timeout. `None` means block indefinitely.
    fn recv_timeout(&self) -> Result<Option<Duration>, Error>;

    /// Set the receive timeout. `None` means block indefinitely.
    fn set_recv_timeout(&mut self, timeout: Option<Duration>) -> Result<(), Error>;
}
