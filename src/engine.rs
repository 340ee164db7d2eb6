//! Crypto engine contract.
//!
//! The engine performs the actual handshake and record-layer cryptography.
//! This crate only decides when to invoke it, how to configure it and how to
//! translate its results; the trait below is exactly that boundary.
//!
//! Byte-level I/O is not registered as callbacks the way a C engine would do
//! it. Instead every operation that may touch the wire receives a [`RecordIo`]
//! capability for the duration of the call, which keeps the borrow flow
//! explicit and the engine free of self-references.

use std::fmt;
use std::time::Duration;

use crate::entropy::EntropyPool;
use crate::error::{Alert, Error};
use crate::session::Session;
use crate::transport::TransportKind;

/// Numeric ciphersuite identifier, as assigned by the engine (IANA id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherId(pub u16);

impl fmt::Display for CipherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Endpoint role in the protocol. Derived from the transport state, never
/// chosen directly by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Minimum protocol version requested by the caller.
///
/// `Default` lets the engine pick its lowest supported version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinVersion {
    #[default]
    Default,
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

/// Outcome of a single handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// The handshake completed.
    Done,
    /// The engine needs more input before it can make progress.
    WantRead,
    /// The engine has output to flush before it can make progress.
    WantWrite,
}

/// Error codes reported by the engine.
///
/// `WantRead`/`WantWrite` are cooperative retry signals, absorbed by the
/// socket's retry loops and never surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("want read")]
    WantRead,

    #[error("want write")]
    WantWrite,

    #[error("timed out")]
    Timeout,

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("allocation failure")]
    Alloc,

    #[error("not supported: {0}")]
    Unsupported(&'static str),

    #[error("{0}")]
    Failed(String),
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        match e {
            // A retry code escaping to a definite outcome means the engine
            // broke its contract; report it as a protocol failure.
            EngineError::WantRead | EngineError::WantWrite => {
                Error::Protocol("engine retry code escaped operation".into())
            }
            EngineError::Timeout => Error::Timeout,
            EngineError::PeerClosed => Error::Protocol("peer closed the connection".into()),
            EngineError::Alloc => Error::OutOfMemory,
            EngineError::Unsupported(what) => Error::Unsupported(what),
            EngineError::Failed(msg) => Error::Protocol(msg),
        }
    }
}

/// Failure codes a [`RecordIo`] reports back to the engine.
///
/// The secure socket records the underlying [`Error`] in its sticky slot
/// before returning `Failed`, so diagnostics are not lost in translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BioError {
    /// The transport cannot make progress right now.
    WouldBlock,
    /// The transport receive timeout expired.
    Timeout,
    /// A definite transport failure.
    Failed,
}

/// Byte-level transport surface handed to the engine per operation.
pub trait RecordIo {
    /// Send raw bytes, returning how many were accepted.
    fn send(&mut self, buf: &[u8]) -> Result<usize, BioError>;

    /// Receive raw bytes.
    ///
    /// `timeout` is the engine's retransmission deadline for this read; when
    /// set it temporarily overrides the transport's own receive timeout.
    fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, BioError>;
}

/// Per-record overhead added by the security layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOverhead {
    /// Header plus authentication tag bytes added to every record.
    pub header: usize,
    /// Worst-case padding (block ciphers only, zero for AEAD suites).
    pub padding: usize,
}

/// The cryptographic engine driving one secure connection.
///
/// Configuration setters may be called until [`Engine::start`] creates the
/// handshake context; after that only context operations are meaningful.
/// Implementations are free to defer validation to `start`.
pub trait Engine {
    /// Full ciphersuite list supported by the engine, in its native order.
    fn supported_ciphersuites(&self) -> Vec<CipherId>;

    /// Whether the given suite uses PSK key exchange.
    fn suite_uses_psk(&self, suite: CipherId) -> bool;

    /// Install baseline defaults for the given role and transport kind.
    fn apply_defaults(&mut self, role: Role, kind: TransportKind) -> Result<(), EngineError>;

    /// Set the minimum accepted protocol version.
    ///
    /// The engine maps `Default` to its lowest supported version and fails
    /// for versions it cannot honor. No silent downgrade or upgrade.
    fn set_min_version(&mut self, version: MinVersion) -> Result<(), EngineError>;

    /// Install the random-number source.
    fn set_rng(&mut self, rng: EntropyPool);

    /// Handshake retransmission timeout range in milliseconds.
    fn set_handshake_timeouts(&mut self, min_ms: u32, max_ms: u32);

    /// Set the endpoint role.
    fn set_endpoint(&mut self, role: Role);

    /// Enable or disable session tickets.
    fn set_session_tickets(&mut self, enabled: bool);

    /// Restrict the engine to the given ciphersuites, in order of preference.
    fn set_ciphersuites(&mut self, suites: &[CipherId]);

    /// Require or waive peer certificate verification.
    fn set_verify_peer(&mut self, required: bool);

    /// Install the trusted CA chain (DER certificates).
    fn set_ca_chain(&mut self, certs_der: &[Vec<u8>]) -> Result<(), EngineError>;

    /// Install our own certificate chain and PKCS#8 private key (DER).
    fn set_own_cert(&mut self, chain_der: &[Vec<u8>], key_der: &[u8]) -> Result<(), EngineError>;

    /// Install the pre-shared key and its identity.
    fn set_psk(&mut self, identity: &[u8], key: &[u8]) -> Result<(), EngineError>;

    /// Enable connection-id negotiation (datagram transports only).
    fn set_connection_id(&mut self, enabled: bool) -> Result<(), EngineError>;

    /// Create the handshake context from the accumulated configuration.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Set the hostname used for SNI and peer certificate matching.
    fn set_hostname(&mut self, host: &str) -> Result<(), EngineError>;

    /// Offer a previously persisted session for resumption.
    fn set_session(&mut self, session: &Session) -> Result<(), EngineError>;

    /// Drive a single handshake step.
    fn handshake_step(&mut self, io: &mut dyn RecordIo) -> Result<HandshakeStatus, EngineError>;

    /// Post-handshake certificate verification result. Zero means no fault.
    fn verify_result(&self) -> u32;

    /// Connection id assigned by the peer, if one was negotiated.
    fn peer_cid(&self) -> Option<Vec<u8>>;

    /// The currently established session, if any.
    fn current_session(&self) -> Option<Session>;

    /// Negotiated ciphersuite of the established connection.
    fn negotiated_ciphersuite(&self) -> Option<CipherId>;

    /// Per-record expansion of the established connection.
    fn record_overhead(&self) -> Result<RecordOverhead, EngineError>;

    /// Encrypt and send one record (or part of one).
    fn write_record(&mut self, io: &mut dyn RecordIo, data: &[u8]) -> Result<usize, EngineError>;

    /// Receive and decrypt record data into `buf`.
    ///
    /// Reports `PeerClosed` for a clean shutdown and `Timeout` when the
    /// transport deadline expired.
    fn read_record(&mut self, io: &mut dyn RecordIo, buf: &mut [u8])
        -> Result<usize, EngineError>;

    /// Decrypted bytes buffered inside the engine but not yet read.
    ///
    /// For datagram transports this exposes the remainder of a record that
    /// did not fit the caller's buffer.
    fn pending_bytes(&self) -> usize;

    /// The most recently received protocol alert, if any.
    fn last_alert(&self) -> Option<Alert>;

    /// Tear down the handshake context. Must be idempotent.
    fn stop(&mut self);
}
