//! Session persistence.
//!
//! An established session can be serialized into a caller-owned fixed-size
//! buffer and offered back to the engine on a later connect to attempt
//! resumption. The encoding is self-describing and versioned; restore
//! validates everything and rejects buffers it does not fully recognize.

use std::fmt;
use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use crate::engine::CipherId;
use crate::error::Error;

const MAGIC: &[u8; 4] = b"TSES";
const VERSION: u8 = 1;
const SESSION_ID_MAX: usize = 32;

/// An engine session snapshot, sufficient to attempt resumption.
#[derive(Clone)]
pub struct Session {
    pub ciphersuite: CipherId,
    pub compression: u8,
    /// Session id assigned by the server. At most 32 bytes.
    pub id: Vec<u8>,
    /// Engine-defined session start time, when the engine tracks one.
    pub start: Option<u64>,
    /// Opaque resumption secret. Never logged, zeroed on drop.
    pub secret: Zeroizing<Vec<u8>>,
}

impl Session {
    /// Build a session snapshot, wrapping the secret in zeroizing storage.
    pub fn new(ciphersuite: CipherId, id: Vec<u8>, start: Option<u64>, secret: Vec<u8>) -> Self {
        Self {
            ciphersuite,
            compression: 0,
            id,
            start,
            secret: Zeroizing::new(secret),
        }
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.ciphersuite == other.ciphersuite
            && self.compression == other.compression
            && self.id == other.id
            && self.start == other.start
            && *self.secret == *other.secret
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("ciphersuite", &self.ciphersuite)
            .field("compression", &self.compression)
            .field("id", &self.id)
            .field("start", &self.start)
            .field("secret", &format_args!("[{} bytes]", self.secret.len()))
            .finish()
    }
}

/// Whether `restored` and `current` describe the same resumable session.
///
/// Compares the identifying fields only; the secret is deliberately left out
/// since a renegotiated secret does not make it a different session. The
/// start time participates only when both sides track one.
pub(crate) fn resumption_equal(a: &Session, b: &Session) -> bool {
    let start_matches = match (a.start, b.start) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    };
    a.ciphersuite == b.ciphersuite && a.compression == b.compression && a.id == b.id && start_matches
}

/// Caller-owned, fixed-size storage for a serialized session.
///
/// The size is chosen by the caller at creation and never changes. A buffer
/// too small for a given session simply fails to restore later; saving never
/// reports an error.
pub struct SessionBuffer {
    data: Vec<u8>,
}

impl SessionBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    /// Convenience for the common case of a buffer shared with a socket.
    pub fn shared(size: usize) -> Arc<Mutex<SessionBuffer>> {
        Arc::new(Mutex::new(Self::new(size)))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for SessionBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

/// Serialize `session` into `buf`, best-effort.
///
/// Writes stop silently at the end of the buffer. A truncated buffer is
/// detected on restore, not here, so persistence failure never disturbs an
/// otherwise successful handshake.
pub(crate) fn save(session: &Session, buf: &mut SessionBuffer) {
    let mut w = Writer::new(buf.as_mut_slice());
    w.bytes(MAGIC);
    w.u8(VERSION);
    w.u16(session.ciphersuite.0);
    w.u8(session.compression);
    w.u8(session.id.len().min(SESSION_ID_MAX) as u8);
    w.bytes(&session.id[..session.id.len().min(SESSION_ID_MAX)]);
    match session.start {
        Some(start) => {
            w.u8(1);
            w.u64(start);
        }
        None => w.u8(0),
    }
    w.u32(session.secret.len() as u32);
    w.bytes(&session.secret);
}

/// Deserialize a session from `buf`.
///
/// Any structural defect, including a truncated write from an undersized
/// buffer, yields [`Error::CorruptData`].
pub(crate) fn restore(buf: &SessionBuffer) -> Result<Session, Error> {
    let mut r = Reader::new(buf.as_slice());

    if r.bytes(MAGIC.len())? != MAGIC {
        return Err(Error::CorruptData);
    }
    if r.u8()? != VERSION {
        return Err(Error::CorruptData);
    }

    let ciphersuite = CipherId(r.u16()?);
    let compression = r.u8()?;

    let id_len = r.u8()? as usize;
    if id_len > SESSION_ID_MAX {
        return Err(Error::CorruptData);
    }
    let id = r.bytes(id_len)?.to_vec();

    let start = match r.u8()? {
        0 => None,
        1 => Some(r.u64()?),
        _ => return Err(Error::CorruptData),
    };

    let secret_len = r.u32()? as usize;
    let secret = Zeroizing::new(r.bytes(secret_len)?.to_vec());

    Ok(Session {
        ciphersuite,
        compression,
        id,
        start,
        secret,
    })
}

/// Writer that silently drops bytes past the end of its slice.
struct Writer<'a> {
    out: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(out: &'a mut [u8]) -> Self {
        Self { out, pos: 0 }
    }

    fn bytes(&mut self, v: &[u8]) {
        let room = self.out.len().saturating_sub(self.pos);
        let n = v.len().min(room);
        self.out[self.pos..self.pos + n].copy_from_slice(&v[..n]);
        self.pos += n;
    }

    fn u8(&mut self, v: u8) {
        self.bytes(&[v]);
    }

    fn u16(&mut self, v: u16) {
        self.bytes(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes(&v.to_be_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.bytes(&v.to_be_bytes());
    }
}

/// Reader that turns any overrun into `CorruptData`.
struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.input.len() - self.pos < n {
            return Err(Error::CorruptData);
        }
        let out = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        let b = self.bytes(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        Session {
            ciphersuite: CipherId(0xc02b),
            compression: 0,
            id: vec![0xaa; 24],
            start: Some(1_700_000_000),
            secret: Zeroizing::new(vec![0x5c; 48]),
        }
    }

    #[test]
    fn round_trip() {
        let mut buf = SessionBuffer::new(256);
        save(&sample(), &mut buf);

        let restored = restore(&buf).unwrap();
        assert_eq!(restored, sample());
    }

    #[test]
    fn round_trip_without_start() {
        let mut session = sample();
        session.start = None;

        let mut buf = SessionBuffer::new(256);
        save(&session, &mut buf);

        assert_eq!(restore(&buf).unwrap(), session);
    }

    #[test]
    fn undersized_buffer_fails_on_restore() {
        // Large enough for the header, too small for the secret.
        let mut buf = SessionBuffer::new(40);
        save(&sample(), &mut buf);

        assert!(matches!(restore(&buf), Err(Error::CorruptData)));
    }

    #[test]
    fn garbage_buffer_fails_on_restore() {
        let mut buf = SessionBuffer::new(64);
        for (i, b) in buf.as_mut_slice().iter_mut().enumerate() {
            *b = i as u8;
        }

        assert!(matches!(restore(&buf), Err(Error::CorruptData)));
    }

    #[test]
    fn zeroed_buffer_fails_on_restore() {
        let buf = SessionBuffer::new(64);
        assert!(matches!(restore(&buf), Err(Error::CorruptData)));
    }

    #[test]
    fn resumption_equality_ignores_the_secret() {
        let a = sample();
        let mut b = sample();
        b.secret = Zeroizing::new(vec![1, 2, 3]);
        assert!(resumption_equal(&a, &b));

        let mut c = sample();
        c.id[0] ^= 1;
        assert!(!resumption_equal(&a, &c));

        let mut d = sample();
        d.ciphersuite = CipherId(0x1301);
        assert!(!resumption_equal(&a, &d));
    }

    #[test]
    fn start_time_only_compared_when_both_track_it() {
        let a = sample();

        let mut b = sample();
        b.start = None;
        assert!(resumption_equal(&a, &b));

        let mut c = sample();
        c.start = Some(1);
        assert!(!resumption_equal(&a, &c));
    }
}
