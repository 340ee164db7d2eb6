#![forbid(unsafe_code)]
#![warn(clippy::all)]
//! Secure-channel decoration for byte and datagram transports.
//!
//! This crate turns any [`Transport`] into a secured one by wrapping it in a
//! [`SecureSocket`]. The cryptography itself is delegated to a pluggable
//! [`Engine`]; this crate contributes everything around it: loading and
//! owning security material, deriving the endpoint role from the transport,
//! filtering ciphersuites to the active authentication mode, driving the
//! handshake with paced retries, persisting sessions for resumption, and
//! translating engine and transport failures into one error taxonomy.
//!
//! Stream transports are secured with TLS semantics, datagram transports
//! with DTLS semantics; the distinction is read off the transport, never
//! configured separately.
//!
//! ```no_run
//! use secsock::{Config, PskConfig, SecurityConfig, SecureSocket, EntropyPool};
//! # fn connect(transport: impl secsock::Transport, engine: Box<dyn secsock::Engine>)
//! # -> Result<(), secsock::Error> {
//! let config = Config::builder(SecurityConfig::Psk(PskConfig {
//!     identity: b"device-1".to_vec(),
//!     key: b"secret".to_vec(),
//! }))
//! .build()?;
//!
//! let mut socket = SecureSocket::new(transport, engine, config, EntropyPool::new(None))?;
//! socket.connect("example.org", 5684)?;
//! socket.send(b"hello")?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod ciphers;
mod config;
mod engine;
mod entropy;
mod error;
mod material;
mod session;
mod socket;
mod transport;

pub use config::{Config, ConfigBuilder, EngineHook};
pub use engine::{
    BioError, CipherId, Engine, EngineError, HandshakeStatus, MinVersion, RecordIo,
    RecordOverhead, Role,
};
pub use entropy::EntropyPool;
pub use error::{Alert, Error};
pub use material::{
    CertificateConfig, DataSource, KeySource, PskConfig, SecurityConfig, SecurityMode,
};
pub use session::{Session, SessionBuffer};
pub use socket::SecureSocket;
pub use transport::{Transport, TransportKind, TransportState};
