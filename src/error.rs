//! Unified error taxonomy for secure socket operations.
//!
//! Every public operation returns a single definite outcome: success or one
//! of the [`Error`] variants. Retry codes from the crypto engine are absorbed
//! internally and never surface here.

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors returned by secure socket operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or contradictory setup. Fatal to connect, never retried.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Handshake or verification failure reported by the crypto engine.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// Handshake or receive exceeded the negotiated or transport timeout.
    #[error("operation timed out")]
    Timeout,

    /// A caller-supplied value exceeds a fixed internal bound.
    #[error("{0} exceeds the allowed range")]
    Range(&'static str),

    /// Allocation failure reported by the engine.
    #[error("out of memory")]
    OutOfMemory,

    /// A datagram record did not fit the caller's buffer. The remainder of
    /// the record is discarded, never concatenated into a later read.
    #[error("datagram truncated: receive buffer too small")]
    MessageTooLarge,

    /// A persisted session could not be parsed back.
    #[error("malformed persisted session")]
    CorruptData,

    /// Feature compiled out or mode not implemented.
    #[error("not supported: {0}")]
    Unsupported(&'static str),
}

/// Protocol alert metadata captured from the engine.
///
/// Available as best-effort diagnostic state after a failed receive or
/// handshake. Cleared at the start of every receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    /// Alert level byte (1 = warning, 2 = fatal).
    pub level: u8,
    /// Alert description byte as defined by the TLS alert registry.
    pub description: u8,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alert_level = {}, alert_description = {}",
            self.level, self.description
        )
    }
}
