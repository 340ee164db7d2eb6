//! The secure socket decorator.
//!
//! [`SecureSocket`] wraps a plain [`Transport`] and an [`Engine`] and exposes
//! the same transport surface, with every byte passing through the engine's
//! record layer. The socket owns the sequencing: engine configuration,
//! handshake driving, retry absorption, session persistence and error
//! translation all live here, while the cryptography stays in the engine.

use std::fmt;
use std::io;
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::backoff::ExponentialBackoff;
use crate::ciphers;
use crate::config::Config;
use crate::engine::{
    BioError, CipherId, Engine, EngineError, HandshakeStatus, RecordIo, RecordOverhead, Role,
};
use crate::entropy::EntropyPool;
use crate::error::{Alert, Error};
use crate::material::{self, SecurityMaterial};
use crate::session::{self, Session};
use crate::transport::{Transport, TransportKind, TransportState};

/// Scratch size for discarding buffered datagram remainders.
const DRAIN_CHUNK: usize = 1024;

/// A transport decorated with a secure channel.
///
/// Created over an existing transport, which may already be connected (or
/// accepted); [`SecureSocket::connect`] performs the transport connect and
/// the handshake in one step, [`SecureSocket::handshake`] secures an already
/// established connection.
pub struct SecureSocket<T: Transport> {
    transport: T,
    engine: Box<dyn Engine>,
    entropy: EntropyPool,
    config: Config,
    material: SecurityMaterial,
    effective_ciphersuites: Vec<CipherId>,
    context_valid: bool,
    session_restored: bool,
    last_alert: Option<Alert>,
    /// Transport error captured inside a record I/O callback. Takes
    /// precedence over the engine's generic failure code for the same
    /// operation, so the caller sees the root cause.
    bio_error: Option<Error>,
}

impl<T: Transport> fmt::Debug for SecureSocket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSocket")
            .field("context_valid", &self.context_valid)
            .field("session_restored", &self.session_restored)
            .field("last_alert", &self.last_alert)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SecureSocket<T> {
    /// Decorate `transport` with the given engine and configuration.
    ///
    /// Security material is loaded here, before any network activity, so a
    /// misconfigured socket fails fast and deterministically.
    pub fn new(
        transport: T,
        engine: Box<dyn Engine>,
        config: Config,
        entropy: EntropyPool,
    ) -> Result<Self, Error> {
        let material = material::load(config.security())?;
        Ok(Self {
            transport,
            engine,
            entropy,
            config,
            material,
            effective_ciphersuites: Vec::new(),
            context_valid: false,
            session_restored: false,
            last_alert: None,
            bio_error: None,
        })
    }

    /// Connect the underlying transport and perform the handshake.
    ///
    /// On handshake failure the freshly opened transport connection is
    /// closed again, leaving the socket in its unconnected state.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        if self.context_valid {
            return Err(Error::Config("socket is already connected".into()));
        }
        self.transport.connect(host, port)?;
        if let Err(e) = self.start_handshake(Some(host)) {
            let _ = self.transport.close();
            return Err(e);
        }
        Ok(())
    }

    /// Perform the handshake over an already connected (or accepted)
    /// transport. The transport connection is left open on failure since
    /// the caller established it.
    pub fn handshake(&mut self, host: Option<&str>) -> Result<(), Error> {
        if self.context_valid {
            return Err(Error::Config("socket is already connected".into()));
        }
        self.start_handshake(host)
    }

    /// Encrypt and send all of `data`.
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.ensure_started()?;
        self.bio_error = None;

        let mut sent = 0;
        let mut last_err = None;
        while sent < data.len() {
            let mut bio = TransportBio::new(&mut self.transport, &mut self.bio_error);
            match self.engine.write_record(&mut bio, &data[sent..]) {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(EngineError::WantRead) | Err(EngineError::WantWrite) => continue,
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }

        if sent < data.len() {
            warn!("send failed ({}/{} bytes written)", sent, data.len());
            return Err(match self.bio_error.take() {
                Some(err) => err,
                None => match last_err {
                    Some(e) => e.into(),
                    None => Error::Protocol("record write made no progress".into()),
                },
            });
        }
        Ok(())
    }

    /// Receive and decrypt application data into `buffer`.
    ///
    /// A clean close by the peer is reported as `Ok(0)`. On a datagram
    /// transport each call returns exactly one record; a record larger than
    /// `buffer` yields [`Error::MessageTooLarge`] and its remainder is
    /// discarded on the next call, never concatenated.
    pub fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        self.ensure_started()?;
        self.last_alert = None;
        self.bio_error = None;

        let datagram = self.transport.kind() == TransportKind::Datagram;
        if datagram {
            self.drain_pending()?;
        }

        loop {
            let mut bio = TransportBio::new(&mut self.transport, &mut self.bio_error);
            match self.engine.read_record(&mut bio, buffer) {
                Ok(n) => {
                    if datagram && self.engine.pending_bytes() > 0 {
                        warn!(
                            "datagram truncated: {} bytes did not fit the buffer",
                            self.engine.pending_bytes()
                        );
                        return Err(Error::MessageTooLarge);
                    }
                    return Ok(n);
                }
                Err(EngineError::WantRead) | Err(EngineError::WantWrite) => continue,
                Err(EngineError::PeerClosed) => {
                    debug!("peer closed the secure channel");
                    return Ok(0);
                }
                Err(e) => {
                    self.last_alert = self.engine.last_alert();
                    return Err(match self.bio_error.take() {
                        Some(err) => err,
                        None => Error::from(e),
                    });
                }
            }
        }
    }

    /// Tear down the secure channel and close the underlying transport.
    /// Closing an already closed socket is a no-op.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.context_valid {
            trace!("closing secure channel");
            self.engine.stop();
            self.context_valid = false;
            self.session_restored = false;
        }
        self.transport.close()
    }

    /// Whether the current connection resumed a previously persisted session.
    pub fn session_resumed(&self) -> bool {
        self.session_restored
    }

    /// The most recent protocol alert received from the peer, if any.
    pub fn last_alert(&self) -> Option<Alert> {
        self.last_alert
    }

    /// Ciphersuites actually offered to the peer, after mode and allow-list
    /// filtering.
    pub fn effective_ciphersuites(&self) -> &[CipherId] {
        &self.effective_ciphersuites
    }

    /// Per-record overhead of the established connection.
    pub fn overhead(&self) -> Result<RecordOverhead, Error> {
        self.ensure_started()?;
        self.engine.record_overhead().map_err(Error::from)
    }

    /// The decorated transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn ensure_started(&self) -> Result<(), Error> {
        if self.context_valid {
            Ok(())
        } else {
            Err(Error::Config("secure connection not established".into()))
        }
    }

    /// The role is a property of how the transport got connected, never a
    /// separate knob that could contradict it.
    fn endpoint_role(&self) -> Result<Role, Error> {
        match self.transport.state() {
            TransportState::Connected => Ok(Role::Client),
            TransportState::Accepted => Ok(Role::Server),
            state => Err(Error::Config(format!(
                "transport in state {:?} cannot be secured",
                state
            ))),
        }
    }

    fn start_handshake(&mut self, host: Option<&str>) -> Result<(), Error> {
        let role = self.endpoint_role()?;
        debug!("starting handshake as {:?}", role);

        self.configure_engine(role)?;
        self.engine.start().map_err(Error::from)?;
        self.context_valid = true;

        if let Err(e) = self.drive_handshake(role, host) {
            self.engine.stop();
            self.context_valid = false;
            return Err(e);
        }
        Ok(())
    }

    /// Apply the full configuration to the engine, in dependency order. The
    /// caller hook runs last so it can override anything set here.
    fn configure_engine(&mut self, role: Role) -> Result<(), Error> {
        let kind = self.transport.kind();

        self.engine
            .apply_defaults(role, kind)
            .map_err(|e| Error::Config(format!("engine defaults rejected: {}", e)))?;
        self.engine
            .set_min_version(self.config.min_version())
            .map_err(|e| Error::Config(format!("protocol version rejected: {}", e)))?;
        self.engine.set_rng(self.entropy.clone());

        let (min, max) = self.config.handshake_timeouts();
        // Millisecond range validated when the config was built.
        self.engine
            .set_handshake_timeouts(min.as_millis() as u32, max.as_millis() as u32);

        self.engine.set_endpoint(role);
        // Only clients make use of tickets; on the server side they would
        // hand out state we never read back.
        self.engine.set_session_tickets(role == Role::Client);

        let suites = ciphers::select(
            self.engine.as_ref(),
            self.material.mode(),
            self.config.enabled_ciphersuites(),
        );
        if suites.is_empty() {
            return Err(Error::Config(
                "no ciphersuite matches the security mode and allowed list".into(),
            ));
        }
        trace!("offering {} ciphersuite(s)", suites.len());
        self.engine.set_ciphersuites(&suites);
        self.effective_ciphersuites = suites;

        match &self.material {
            SecurityMaterial::Certificate(m) => {
                self.engine.set_verify_peer(m.verify_peer);
                if !m.ca_chain.is_empty() {
                    self.engine
                        .set_ca_chain(&m.ca_chain)
                        .map_err(|e| Error::Config(format!("CA chain rejected: {}", e)))?;
                }
                if let Some(key) = &m.client_key {
                    self.engine
                        .set_own_cert(&m.client_chain, key)
                        .map_err(|e| Error::Config(format!("client cert rejected: {}", e)))?;
                }
            }
            SecurityMaterial::Psk(m) => {
                self.engine
                    .set_psk(&m.identity, &m.key)
                    .map_err(|e| Error::Config(format!("PSK rejected: {}", e)))?;
            }
        }

        if self.config.use_connection_id() {
            if kind == TransportKind::Datagram {
                self.engine
                    .set_connection_id(true)
                    .map_err(|e| Error::Config(format!("connection id rejected: {}", e)))?;
            } else {
                debug!("connection id requested on a stream transport, ignoring");
            }
        }

        if let Some(hook) = self.config.engine_hook() {
            hook(self.engine.as_mut())
                .map_err(|e| Error::Config(format!("engine hook failed: {}", e)))?;
        }

        Ok(())
    }

    fn drive_handshake(&mut self, role: Role, host: Option<&str>) -> Result<(), Error> {
        let hostname = self
            .config
            .server_name_indication()
            .or(host)
            .filter(|h| !h.is_empty())
            .map(str::to_owned);
        if let Some(h) = &hostname {
            self.engine.set_hostname(h).map_err(Error::from)?;
        }

        // Offer the persisted session before the first flight. Failure to
        // restore is never fatal; it just forces a full handshake.
        let mut restored: Option<Session> = None;
        if role == Role::Client {
            if let Some(buffer) = self.config.session_buffer().cloned() {
                let guard = buffer.lock().unwrap_or_else(|e| e.into_inner());
                match session::restore(&guard) {
                    Ok(s) => match self.engine.set_session(&s) {
                        Ok(()) => {
                            debug!("offering persisted session for resumption");
                            restored = Some(s);
                        }
                        Err(e) => warn!("engine rejected persisted session: {}", e),
                    },
                    Err(e) => debug!("no resumable session available: {}", e),
                }
            }
        }

        self.bio_error = None;
        let (min_rto, max_rto) = self.config.handshake_timeouts();
        let mut backoff = ExponentialBackoff::new(min_rto, max_rto, &self.entropy);

        loop {
            let mut bio = TransportBio::new(&mut self.transport, &mut self.bio_error);
            match self.engine.handshake_step(&mut bio) {
                Ok(HandshakeStatus::Done) => break,
                Ok(HandshakeStatus::WantRead) | Ok(HandshakeStatus::WantWrite) => {
                    // Progress stalled on a non-blocking transport: pace the
                    // retries instead of spinning.
                    if bio.would_block {
                        if !backoff.can_retry() {
                            return Err(Error::Timeout);
                        }
                        thread::sleep(backoff.rto());
                        backoff.attempt(&self.entropy);
                    }
                }
                Err(e) => {
                    self.last_alert = self.engine.last_alert();
                    return Err(match self.bio_error.take() {
                        Some(err) => err,
                        None => Error::from(e),
                    });
                }
            }
        }

        if let Some(suite) = self.engine.negotiated_ciphersuite() {
            debug!("handshake complete, ciphersuite {}", suite);
        }
        if let Some(cid) = self.engine.peer_cid() {
            debug!("peer assigned a {}-byte connection id", cid.len());
        }

        let current = self.engine.current_session();
        if role == Role::Client {
            if let Some(buffer) = self.config.session_buffer().cloned() {
                let mut guard = buffer.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(cur) = &current {
                    session::save(cur, &mut guard);
                }
            }
        }
        self.session_restored = match (&restored, &current) {
            (Some(r), Some(c)) => session::resumption_equal(r, c),
            _ => false,
        };
        if self.session_restored {
            debug!("session resumed");
        }

        // A resumed session was verified when it was first established; the
        // engine reports no fresh result for it.
        let verification_enabled =
            matches!(&self.material, SecurityMaterial::Certificate(m) if m.verify_peer);
        if verification_enabled && !self.session_restored {
            let result = self.engine.verify_result();
            if result != 0 {
                return Err(Error::Protocol(format!(
                    "peer certificate verification failed: 0x{:08x}",
                    result
                )));
            }
        }

        Ok(())
    }

    /// Discard engine-buffered bytes left over from a truncated datagram so
    /// the next read starts at a record boundary.
    fn drain_pending(&mut self) -> Result<(), Error> {
        let mut scratch = [0u8; DRAIN_CHUNK];
        while self.engine.pending_bytes() > 0 {
            let mut bio = TransportBio::new(&mut self.transport, &mut self.bio_error);
            match self.engine.read_record(&mut bio, &mut scratch) {
                Ok(_) => {}
                Err(EngineError::WantRead) | Err(EngineError::WantWrite) => continue,
                Err(e) => {
                    return Err(match self.bio_error.take() {
                        Some(err) => err,
                        None => Error::from(e),
                    });
                }
            }
        }
        Ok(())
    }
}

impl<T: Transport> Drop for SecureSocket<T> {
    fn drop(&mut self) {
        if self.context_valid {
            self.engine.stop();
            self.context_valid = false;
        }
        let _ = self.transport.close();
    }
}

/// The decorated socket is itself a transport, so secured and plain channels
/// compose the same way.
impl<T: Transport> Transport for SecureSocket<T> {
    fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    fn state(&self) -> TransportState {
        self.transport.state()
    }

    fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        SecureSocket::connect(self, host, port)
    }

    fn send(&mut self, buffer: &[u8]) -> Result<usize, Error> {
        SecureSocket::send(self, buffer)?;
        Ok(buffer.len())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        self.receive(buffer)
    }

    fn close(&mut self) -> Result<(), Error> {
        SecureSocket::close(self)
    }

    fn recv_timeout(&self) -> Result<Option<Duration>, Error> {
        self.transport.recv_timeout()
    }

    fn set_recv_timeout(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        self.transport.set_recv_timeout(timeout)
    }
}

/// Record I/O surface over the decorated transport.
///
/// Captures the underlying [`Error`] in the socket's sticky slot whenever it
/// has to report the lossy [`BioError::Failed`], and notes would-block
/// conditions so the handshake loop can pace its retries.
struct TransportBio<'a> {
    transport: &'a mut dyn Transport,
    sticky: &'a mut Option<Error>,
    would_block: bool,
}

impl<'a> TransportBio<'a> {
    fn new(transport: &'a mut dyn Transport, sticky: &'a mut Option<Error>) -> Self {
        Self {
            transport,
            sticky,
            would_block: false,
        }
    }

    fn fail(&mut self, e: Error) -> BioError {
        *self.sticky = Some(e);
        BioError::Failed
    }
}

impl RecordIo for TransportBio<'_> {
    fn send(&mut self, buf: &[u8]) -> Result<usize, BioError> {
        match self.transport.send(buf) {
            Ok(n) => Ok(n),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                self.would_block = true;
                Err(BioError::WouldBlock)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, BioError> {
        // The engine's retransmission deadline temporarily overrides the
        // transport's own receive timeout; the original is always restored.
        let original = match self.transport.recv_timeout() {
            Ok(t) => t,
            Err(e) => return Err(self.fail(e)),
        };
        if timeout.is_some() {
            if let Err(e) = self.transport.set_recv_timeout(timeout) {
                return Err(self.fail(e));
            }
        }

        let result = self.transport.recv(buf);

        if timeout.is_some() {
            if let Err(e) = self.transport.set_recv_timeout(original) {
                return Err(self.fail(e));
            }
        }

        match result {
            Ok(n) => Ok(n),
            Err(Error::Timeout) => Err(BioError::Timeout),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                self.would_block = true;
                Err(BioError::WouldBlock)
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}
