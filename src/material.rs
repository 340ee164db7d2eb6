//! Loading and ownership of security material.
//!
//! Certificate material may come from files, directories of files or
//! in-memory buffers, in DER or PEM form. Loading is best-effort per source:
//! a certificate that fails to parse is logged and skipped, and only the
//! absence of any usable material (when material is required) aborts the
//! load. PSK material is always copied into owned storage so the caller's
//! buffers do not have to outlive configuration.

use std::fs;
use std::path::PathBuf;

use log::{debug, error, trace, warn};
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo, SecretDocument};
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;
use zeroize::Zeroizing;

use crate::error::Error;

/// Authentication mode. At most one is active per socket instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Certificate,
    Psk,
}

/// Where a piece of security material comes from.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// A single file.
    File(PathBuf),
    /// Every regular file in a directory, each loaded best-effort.
    Dir(PathBuf),
    /// An in-memory DER or PEM blob.
    Buffer(Vec<u8>),
}

/// A private key source plus the password needed if it is encrypted.
#[derive(Debug, Clone)]
pub struct KeySource {
    pub source: DataSource,
    pub password: Option<String>,
}

/// Certificate-mode configuration.
#[derive(Debug, Clone, Default)]
pub struct CertificateConfig {
    /// CA sources. Any combination may be supplied and all are attempted.
    pub ca_sources: Vec<DataSource>,
    /// Whether the peer's certificate must verify against the CA chain.
    ///
    /// When set, at least one CA certificate must load or configuration
    /// fails. When unset, peer authentication is disabled entirely.
    pub verify_peer: bool,
    /// Our own certificate (file or buffer; directories are not accepted).
    pub client_cert: Option<DataSource>,
    /// Private key matching `client_cert`. Required iff a certificate is set.
    pub client_key: Option<KeySource>,
}

/// PSK-mode configuration. Both values are copied on load.
#[derive(Debug, Clone)]
pub struct PskConfig {
    pub identity: Vec<u8>,
    pub key: Vec<u8>,
}

/// Mode selector plus the material sources for that mode.
#[derive(Debug, Clone)]
pub enum SecurityConfig {
    Certificate(CertificateConfig),
    Psk(PskConfig),
}

impl SecurityConfig {
    pub fn mode(&self) -> SecurityMode {
        match self {
            SecurityConfig::Certificate(_) => SecurityMode::Certificate,
            SecurityConfig::Psk(_) => SecurityMode::Psk,
        }
    }
}

/// Loaded, owned security material for one socket.
pub(crate) enum SecurityMaterial {
    Certificate(CertMaterial),
    Psk(PskMaterial),
}

impl std::fmt::Debug for SecurityMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityMaterial::Certificate(_) => f.write_str("SecurityMaterial::Certificate(..)"),
            SecurityMaterial::Psk(_) => f.write_str("SecurityMaterial::Psk(..)"),
        }
    }
}

impl SecurityMaterial {
    pub fn mode(&self) -> SecurityMode {
        match self {
            SecurityMaterial::Certificate(_) => SecurityMode::Certificate,
            SecurityMaterial::Psk(_) => SecurityMode::Psk,
        }
    }
}

pub(crate) struct CertMaterial {
    /// Trusted CA certificates, DER. Empty means peer auth is disabled.
    pub ca_chain: Vec<Vec<u8>>,
    /// Our certificate chain, DER. Empty when no client cert is configured.
    pub client_chain: Vec<Vec<u8>>,
    /// PKCS#8 private key, DER. Present iff `client_chain` is non-empty.
    pub client_key: Option<Zeroizing<Vec<u8>>>,
    pub verify_peer: bool,
}

pub(crate) struct PskMaterial {
    pub identity: Vec<u8>,
    pub key: Zeroizing<Vec<u8>>,
}

/// Load and take ownership of the material described by `config`.
pub(crate) fn load(config: &SecurityConfig) -> Result<SecurityMaterial, Error> {
    match config {
        SecurityConfig::Certificate(cert) => load_certificates(cert),
        SecurityConfig::Psk(psk) => load_psk(psk),
    }
}

fn load_certificates(config: &CertificateConfig) -> Result<SecurityMaterial, Error> {
    trace!("loading certificate material");

    let mut ca_chain = Vec::new();
    if config.verify_peer {
        for source in &config.ca_sources {
            ca_chain.extend(certs_from_source(source));
        }
        if ca_chain.is_empty() {
            error!("peer verification requested but no usable CA certificate could be loaded");
            return Err(Error::Config(
                "peer verification requested but no usable CA certificate could be loaded".into(),
            ));
        }
        debug!("loaded {} CA certificate(s)", ca_chain.len());
    } else {
        debug!("peer authentication disabled");
    }

    let mut client_chain = Vec::new();
    let mut client_key = None;
    if let Some(cert_source) = &config.client_cert {
        if matches!(cert_source, DataSource::Dir(_)) {
            return Err(Error::Config(
                "client certificate cannot be loaded from a directory".into(),
            ));
        }
        client_chain = certs_from_source(cert_source);
        if client_chain.is_empty() {
            return Err(Error::Config("could not load client certificate".into()));
        }

        let key_source = config.client_key.as_ref().ok_or_else(|| {
            Error::Config("client certificate configured without a private key".into())
        })?;
        client_key = Some(load_key(key_source)?);
    } else {
        trace!("client certificate not specified");
    }

    Ok(SecurityMaterial::Certificate(CertMaterial {
        ca_chain,
        client_chain,
        client_key,
        verify_peer: config.verify_peer,
    }))
}

fn load_psk(config: &PskConfig) -> Result<SecurityMaterial, Error> {
    trace!("loading PSK material");
    if config.identity.is_empty() {
        return Err(Error::Config("PSK identity must not be empty".into()));
    }
    if config.key.is_empty() {
        return Err(Error::Config("PSK key must not be empty".into()));
    }
    Ok(SecurityMaterial::Psk(PskMaterial {
        identity: config.identity.clone(),
        key: Zeroizing::new(config.key.clone()),
    }))
}

/// Collect DER certificates from one source, best-effort.
fn certs_from_source(source: &DataSource) -> Vec<Vec<u8>> {
    match source {
        DataSource::File(path) => match fs::read(path) {
            Ok(bytes) => parse_certs(&bytes, &path.display().to_string()),
            Err(e) => {
                warn!("could not read certificate file <{}>: {}", path.display(), e);
                Vec::new()
            }
        },
        DataSource::Dir(path) => {
            let entries = match fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("could not read certificate dir <{}>: {}", path.display(), e);
                    return Vec::new();
                }
            };
            let mut certs = Vec::new();
            for entry in entries.flatten() {
                let file = entry.path();
                if !file.is_file() {
                    continue;
                }
                certs.extend(certs_from_source(&DataSource::File(file)));
            }
            certs
        }
        DataSource::Buffer(bytes) => parse_certs(bytes, "<buffer>"),
    }
}

/// Parse one DER certificate or a PEM bundle. Failures are logged, not fatal.
fn parse_certs(bytes: &[u8], origin: &str) -> Vec<Vec<u8>> {
    if looks_like_pem(bytes) {
        match Certificate::load_pem_chain(bytes) {
            Ok(certs) => {
                let mut out = Vec::with_capacity(certs.len());
                for cert in &certs {
                    match cert.to_der() {
                        Ok(der) => out.push(der),
                        Err(e) => warn!("failed to re-encode certificate in <{}>: {}", origin, e),
                    }
                }
                out
            }
            Err(e) => {
                warn!("failed to parse PEM certificates in <{}>: {}", origin, e);
                Vec::new()
            }
        }
    } else {
        match Certificate::from_der(bytes) {
            Ok(_) => vec![bytes.to_vec()],
            Err(e) => {
                warn!("failed to parse DER certificate in <{}>: {}", origin, e);
                Vec::new()
            }
        }
    }
}

/// Load and validate a private key, decrypting it when needed.
///
/// Unlike certificates, a key that fails to load is always fatal: a client
/// certificate without its key is a contradiction, not a degraded setup.
fn load_key(source: &KeySource) -> Result<Zeroizing<Vec<u8>>, Error> {
    let bytes: Zeroizing<Vec<u8>> = match &source.source {
        DataSource::File(path) => Zeroizing::new(
            fs::read(path)
                .map_err(|e| Error::Config(format!("could not read private key file: {}", e)))?,
        ),
        DataSource::Buffer(bytes) => Zeroizing::new(bytes.clone()),
        DataSource::Dir(_) => {
            return Err(Error::Config(
                "private key cannot be loaded from a directory".into(),
            ))
        }
    };

    if looks_like_pem(&bytes) {
        let pem = std::str::from_utf8(&bytes)
            .map_err(|_| Error::Config("private key PEM is not valid UTF-8".into()))?;
        let (label, doc) = SecretDocument::from_pem(pem)
            .map_err(|e| Error::Config(format!("could not parse private key PEM: {}", e)))?;
        match label {
            "PRIVATE KEY" => Ok(Zeroizing::new(doc.as_bytes().to_vec())),
            "ENCRYPTED PRIVATE KEY" => decrypt_key(doc.as_bytes(), source.password.as_deref()),
            other => Err(Error::Config(format!(
                "unsupported private key PEM label: {}",
                other
            ))),
        }
    } else if PrivateKeyInfo::try_from(bytes.as_slice()).is_ok() {
        Ok(Zeroizing::new(bytes.to_vec()))
    } else if EncryptedPrivateKeyInfo::try_from(bytes.as_slice()).is_ok() {
        decrypt_key(&bytes, source.password.as_deref())
    } else {
        Err(Error::Config("could not parse private key".into()))
    }
}

fn decrypt_key(der: &[u8], password: Option<&str>) -> Result<Zeroizing<Vec<u8>>, Error> {
    let password = password.ok_or_else(|| {
        Error::Config("private key is encrypted but no password was supplied".into())
    })?;
    let encrypted = EncryptedPrivateKeyInfo::try_from(der)
        .map_err(|e| Error::Config(format!("could not parse encrypted private key: {}", e)))?;
    let doc = encrypted
        .decrypt(password)
        .map_err(|e| Error::Config(format!("could not decrypt private key: {}", e)))?;
    Ok(Zeroizing::new(doc.as_bytes().to_vec()))
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    // PEM armor can be preceded by explanatory text; a marker anywhere counts.
    bytes.windows(10).any(|w| w == b"-----BEGIN")
}
