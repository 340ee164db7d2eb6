//! Shared test doubles for the integration tests.
//!
//! This file has no `#[test]` functions; Cargo compiles it as a no-op binary.
//! Import it from other test files via `mod support_common;`.
//!
//! Both doubles hand out `Arc<Mutex<_>>` state so a test can keep a handle
//! for assertions after moving the double into the socket.

#![allow(unused)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use secsock::{
    Alert, BioError, CipherId, Engine, EngineError, EntropyPool, Error, HandshakeStatus,
    MinVersion, RecordIo, RecordOverhead, Role, Session, Transport, TransportKind, TransportState,
};

// ---------------------------------------------------------------------------
// Mock transport

/// One scripted outcome of a transport `recv`.
#[derive(Debug, Clone)]
pub enum RecvStep {
    Data(Vec<u8>),
    Timeout,
    WouldBlock,
    Fail(io::ErrorKind),
}

#[derive(Debug)]
pub struct TransportLog {
    pub kind: TransportKind,
    pub state: TransportState,
    pub recv_timeout: Option<Duration>,
    /// Every `set_recv_timeout` argument, in order.
    pub timeout_sets: Vec<Option<Duration>>,
    /// The timeout in effect at each `recv` call.
    pub recv_timeouts_seen: Vec<Option<Duration>>,
    pub connects: Vec<(String, u16)>,
    pub sent: Vec<Vec<u8>>,
    pub recv_script: VecDeque<RecvStep>,
    pub send_failures: VecDeque<io::ErrorKind>,
    pub io_count: usize,
    pub close_count: usize,
}

/// Scriptable in-memory transport.
#[derive(Clone)]
pub struct MockTransport(pub Arc<Mutex<TransportLog>>);

impl MockTransport {
    pub fn new(kind: TransportKind, state: TransportState) -> Self {
        MockTransport(Arc::new(Mutex::new(TransportLog {
            kind,
            state,
            recv_timeout: Some(Duration::from_secs(30)),
            timeout_sets: Vec::new(),
            recv_timeouts_seen: Vec::new(),
            connects: Vec::new(),
            sent: Vec::new(),
            recv_script: VecDeque::new(),
            send_failures: VecDeque::new(),
            io_count: 0,
            close_count: 0,
        })))
    }

    /// Datagram transport that already completed a connect.
    pub fn connected_datagram() -> Self {
        Self::new(TransportKind::Datagram, TransportState::Connected)
    }

    /// Stream transport that already completed a connect.
    pub fn connected_stream() -> Self {
        Self::new(TransportKind::Stream, TransportState::Connected)
    }

    pub fn log(&self) -> MutexGuard<'_, TransportLog> {
        self.0.lock().unwrap()
    }

    pub fn script_recv(&self, steps: impl IntoIterator<Item = RecvStep>) {
        self.log().recv_script.extend(steps);
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.log().kind
    }

    fn state(&self) -> TransportState {
        self.log().state
    }

    fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        let mut log = self.log();
        log.connects.push((host.to_string(), port));
        log.state = TransportState::Connected;
        Ok(())
    }

    fn send(&mut self, buffer: &[u8]) -> Result<usize, Error> {
        let mut log = self.log();
        log.io_count += 1;
        if let Some(kind) = log.send_failures.pop_front() {
            return Err(Error::Io(kind.into()));
        }
        log.sent.push(buffer.to_vec());
        Ok(buffer.len())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let mut log = self.log();
        log.io_count += 1;
        let timeout = log.recv_timeout;
        log.recv_timeouts_seen.push(timeout);
        match log.recv_script.pop_front() {
            Some(RecvStep::Data(data)) => {
                let n = data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(RecvStep::Timeout) | None => Err(Error::Timeout),
            Some(RecvStep::WouldBlock) => Err(Error::Io(io::ErrorKind::WouldBlock.into())),
            Some(RecvStep::Fail(kind)) => Err(Error::Io(kind.into())),
        }
    }

    fn close(&mut self) -> Result<(), Error> {
        let mut log = self.log();
        log.close_count += 1;
        log.state = TransportState::Closed;
        Ok(())
    }

    fn recv_timeout(&self) -> Result<Option<Duration>, Error> {
        Ok(self.log().recv_timeout)
    }

    fn set_recv_timeout(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        let mut log = self.log();
        log.timeout_sets.push(timeout);
        log.recv_timeout = timeout;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted engine

/// One scripted outcome of `handshake_step`.
#[derive(Debug, Clone)]
pub enum HsStep {
    /// Complete the handshake.
    Done,
    /// Report `WantRead` without touching the wire.
    WantRead,
    /// Write a flight through the record I/O surface.
    Send(Vec<u8>),
    /// Read a flight with the given retransmission deadline.
    Recv { timeout_ms: Option<u64> },
    /// Fail outright.
    Fail(EngineError),
}

/// One scripted outcome of `write_record`.
#[derive(Debug, Clone)]
pub enum WriteStep {
    /// Accept up to `n` bytes without touching the wire.
    Accept(usize),
    /// Pass the data through the record I/O surface.
    Through,
    Fail(EngineError),
}

/// One scripted outcome of `read_record`.
#[derive(Debug, Clone)]
pub enum ReadStep {
    /// Deliver these plaintext bytes; anything past the caller's buffer is
    /// held as pending, the way a truncated datagram record would be.
    Data(Vec<u8>),
    /// Pull bytes through the record I/O surface.
    Through,
    PeerClosed,
    Fail(EngineError),
}

pub struct EngineLog {
    pub supported: Vec<CipherId>,
    pub psk_suites: Vec<CipherId>,
    /// Ordered names of configuration calls, for sequencing assertions.
    pub calls: Vec<&'static str>,
    pub defaults: Option<(Role, TransportKind)>,
    pub min_version: Option<MinVersion>,
    pub reject_min_version: bool,
    pub rng_installed: bool,
    pub timeouts_ms: Option<(u32, u32)>,
    pub endpoint: Option<Role>,
    pub tickets: Option<bool>,
    pub ciphersuites: Vec<CipherId>,
    pub verify_peer: Option<bool>,
    pub ca_chain: Vec<Vec<u8>>,
    pub own_cert: Option<(usize, usize)>,
    pub psk: Option<(Vec<u8>, Vec<u8>)>,
    pub connection_id: Option<bool>,
    pub hostname: Option<String>,
    pub started: bool,
    pub stop_count: usize,
    pub accept_session: bool,
    pub offered_session: Option<Session>,
    /// When set, `current_session` echoes the offered session (a resumed
    /// handshake); otherwise it reports `session_after`.
    pub echo_offered_session: bool,
    pub session_after: Option<Session>,
    pub verify_result: u32,
    pub peer_cid: Option<Vec<u8>>,
    pub alert: Option<Alert>,
    pub hs_script: VecDeque<HsStep>,
    pub write_script: VecDeque<WriteStep>,
    pub read_script: VecDeque<ReadStep>,
    /// Plaintext bytes buffered past the last read.
    pub pending: Vec<u8>,
}

pub const SUITE_ECDHE: CipherId = CipherId(0xc02b);
pub const SUITE_PSK_A: CipherId = CipherId(0x00a8);
pub const SUITE_PSK_B: CipherId = CipherId(0x00ae);

/// Scriptable crypto engine double.
#[derive(Clone)]
pub struct ScriptEngine(pub Arc<Mutex<EngineLog>>);

impl ScriptEngine {
    pub fn new() -> Self {
        ScriptEngine(Arc::new(Mutex::new(EngineLog {
            supported: vec![SUITE_ECDHE, SUITE_PSK_A, SUITE_PSK_B],
            psk_suites: vec![SUITE_PSK_A, SUITE_PSK_B],
            calls: Vec::new(),
            defaults: None,
            min_version: None,
            reject_min_version: false,
            rng_installed: false,
            timeouts_ms: None,
            endpoint: None,
            tickets: None,
            ciphersuites: Vec::new(),
            verify_peer: None,
            ca_chain: Vec::new(),
            own_cert: None,
            psk: None,
            connection_id: None,
            hostname: None,
            started: false,
            stop_count: 0,
            accept_session: false,
            offered_session: None,
            echo_offered_session: false,
            session_after: None,
            verify_result: 0,
            peer_cid: None,
            alert: None,
            hs_script: VecDeque::new(),
            write_script: VecDeque::new(),
            read_script: VecDeque::new(),
            pending: Vec::new(),
        })))
    }

    /// Engine whose handshake completes on the first step.
    pub fn completing() -> Self {
        let engine = Self::new();
        engine.script_handshake([HsStep::Done]);
        engine
    }

    pub fn log(&self) -> MutexGuard<'_, EngineLog> {
        self.0.lock().unwrap()
    }

    pub fn script_handshake(&self, steps: impl IntoIterator<Item = HsStep>) {
        self.log().hs_script.extend(steps);
    }

    pub fn script_write(&self, steps: impl IntoIterator<Item = WriteStep>) {
        self.log().write_script.extend(steps);
    }

    pub fn script_read(&self, steps: impl IntoIterator<Item = ReadStep>) {
        self.log().read_script.extend(steps);
    }

    pub fn boxed(&self) -> Box<dyn Engine> {
        Box::new(self.clone())
    }
}

fn bio_send_failed(e: BioError) -> EngineError {
    match e {
        BioError::WouldBlock => EngineError::WantWrite,
        BioError::Timeout => EngineError::Timeout,
        BioError::Failed => EngineError::Failed("record send failed".into()),
    }
}

fn bio_recv_failed(e: BioError) -> EngineError {
    match e {
        BioError::WouldBlock => EngineError::WantRead,
        BioError::Timeout => EngineError::Timeout,
        BioError::Failed => EngineError::Failed("record recv failed".into()),
    }
}

impl Engine for ScriptEngine {
    fn supported_ciphersuites(&self) -> Vec<CipherId> {
        self.log().supported.clone()
    }

    fn suite_uses_psk(&self, suite: CipherId) -> bool {
        self.log().psk_suites.contains(&suite)
    }

    fn apply_defaults(&mut self, role: Role, kind: TransportKind) -> Result<(), EngineError> {
        let mut log = self.log();
        log.calls.push("apply_defaults");
        log.defaults = Some((role, kind));
        Ok(())
    }

    fn set_min_version(&mut self, version: MinVersion) -> Result<(), EngineError> {
        let mut log = self.log();
        log.calls.push("set_min_version");
        if log.reject_min_version {
            return Err(EngineError::Unsupported("protocol version"));
        }
        log.min_version = Some(version);
        Ok(())
    }

    fn set_rng(&mut self, _rng: EntropyPool) {
        let mut log = self.log();
        log.calls.push("set_rng");
        log.rng_installed = true;
    }

    fn set_handshake_timeouts(&mut self, min_ms: u32, max_ms: u32) {
        let mut log = self.log();
        log.calls.push("set_handshake_timeouts");
        log.timeouts_ms = Some((min_ms, max_ms));
    }

    fn set_endpoint(&mut self, role: Role) {
        let mut log = self.log();
        log.calls.push("set_endpoint");
        log.endpoint = Some(role);
    }

    fn set_session_tickets(&mut self, enabled: bool) {
        let mut log = self.log();
        log.calls.push("set_session_tickets");
        log.tickets = Some(enabled);
    }

    fn set_ciphersuites(&mut self, suites: &[CipherId]) {
        let mut log = self.log();
        log.calls.push("set_ciphersuites");
        log.ciphersuites = suites.to_vec();
    }

    fn set_verify_peer(&mut self, required: bool) {
        let mut log = self.log();
        log.calls.push("set_verify_peer");
        log.verify_peer = Some(required);
    }

    fn set_ca_chain(&mut self, certs_der: &[Vec<u8>]) -> Result<(), EngineError> {
        let mut log = self.log();
        log.calls.push("set_ca_chain");
        log.ca_chain = certs_der.to_vec();
        Ok(())
    }

    fn set_own_cert(&mut self, chain_der: &[Vec<u8>], key_der: &[u8]) -> Result<(), EngineError> {
        let mut log = self.log();
        log.calls.push("set_own_cert");
        log.own_cert = Some((chain_der.len(), key_der.len()));
        Ok(())
    }

    fn set_psk(&mut self, identity: &[u8], key: &[u8]) -> Result<(), EngineError> {
        let mut log = self.log();
        log.calls.push("set_psk");
        log.psk = Some((identity.to_vec(), key.to_vec()));
        Ok(())
    }

    fn set_connection_id(&mut self, enabled: bool) -> Result<(), EngineError> {
        let mut log = self.log();
        log.calls.push("set_connection_id");
        log.connection_id = Some(enabled);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let mut log = self.log();
        log.calls.push("start");
        log.started = true;
        Ok(())
    }

    fn set_hostname(&mut self, host: &str) -> Result<(), EngineError> {
        let mut log = self.log();
        log.calls.push("set_hostname");
        log.hostname = Some(host.to_string());
        Ok(())
    }

    fn set_session(&mut self, session: &Session) -> Result<(), EngineError> {
        let mut log = self.log();
        log.calls.push("set_session");
        if !log.accept_session {
            return Err(EngineError::Failed("resumption not available".into()));
        }
        log.offered_session = Some(session.clone());
        Ok(())
    }

    fn handshake_step(&mut self, io: &mut dyn RecordIo) -> Result<HandshakeStatus, EngineError> {
        let step = self.log().hs_script.pop_front();
        match step {
            Some(HsStep::Done) => Ok(HandshakeStatus::Done),
            Some(HsStep::WantRead) => Ok(HandshakeStatus::WantRead),
            Some(HsStep::Send(data)) => match io.send(&data) {
                Ok(_) => Ok(HandshakeStatus::WantWrite),
                Err(BioError::WouldBlock) => Ok(HandshakeStatus::WantWrite),
                Err(e) => Err(bio_send_failed(e)),
            },
            Some(HsStep::Recv { timeout_ms }) => {
                let mut buf = [0u8; 512];
                match io.recv(&mut buf, timeout_ms.map(Duration::from_millis)) {
                    Ok(_) => Ok(HandshakeStatus::WantRead),
                    Err(BioError::WouldBlock) => Ok(HandshakeStatus::WantRead),
                    Err(e) => Err(bio_recv_failed(e)),
                }
            }
            Some(HsStep::Fail(e)) => Err(e),
            None => Err(EngineError::Failed("handshake script exhausted".into())),
        }
    }

    fn verify_result(&self) -> u32 {
        self.log().verify_result
    }

    fn peer_cid(&self) -> Option<Vec<u8>> {
        self.log().peer_cid.clone()
    }

    fn current_session(&self) -> Option<Session> {
        let log = self.log();
        if log.echo_offered_session {
            log.offered_session.clone()
        } else {
            log.session_after.clone()
        }
    }

    fn negotiated_ciphersuite(&self) -> Option<CipherId> {
        self.log().ciphersuites.first().copied()
    }

    fn record_overhead(&self) -> Result<RecordOverhead, EngineError> {
        Ok(RecordOverhead {
            header: 29,
            padding: 0,
        })
    }

    fn write_record(&mut self, io: &mut dyn RecordIo, data: &[u8]) -> Result<usize, EngineError> {
        let step = self.log().write_script.pop_front();
        match step.unwrap_or(WriteStep::Through) {
            WriteStep::Accept(n) => Ok(n.min(data.len())),
            WriteStep::Through => io.send(data).map_err(bio_send_failed),
            WriteStep::Fail(e) => Err(e),
        }
    }

    fn read_record(&mut self, io: &mut dyn RecordIo, buf: &mut [u8]) -> Result<usize, EngineError> {
        let mut log = self.log();

        // Buffered plaintext is served before anything new is read.
        if !log.pending.is_empty() {
            let n = log.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&log.pending[..n]);
            log.pending.drain(..n);
            return Ok(n);
        }

        match log.read_script.pop_front() {
            Some(ReadStep::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                log.pending = data[n..].to_vec();
                Ok(n)
            }
            Some(ReadStep::Through) => {
                drop(log);
                io.recv(buf, None).map_err(bio_recv_failed)
            }
            Some(ReadStep::PeerClosed) => Err(EngineError::PeerClosed),
            Some(ReadStep::Fail(e)) => Err(e),
            None => Err(EngineError::Failed("read script exhausted".into())),
        }
    }

    fn pending_bytes(&self) -> usize {
        self.log().pending.len()
    }

    fn last_alert(&self) -> Option<Alert> {
        self.log().alert
    }

    fn stop(&mut self) {
        let mut log = self.log();
        log.calls.push("stop");
        log.stop_count += 1;
        log.started = false;
    }
}

// ---------------------------------------------------------------------------
// Config helpers

pub fn psk_security() -> secsock::SecurityConfig {
    secsock::SecurityConfig::Psk(secsock::PskConfig {
        identity: b"device-1".to_vec(),
        key: vec![0x13; 16],
    })
}

pub fn psk_config() -> secsock::Config {
    secsock::Config::builder(psk_security()).build().unwrap()
}

pub fn sample_session() -> Session {
    Session::new(
        SUITE_ECDHE,
        vec![0x42; 16],
        Some(1_700_000_000),
        vec![0x5c; 48],
    )
}
