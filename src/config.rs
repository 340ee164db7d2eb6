use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{CipherId, Engine, EngineError, MinVersion};
use crate::error::Error;
use crate::material::SecurityConfig;
use crate::session::SessionBuffer;

/// SNI hostnames are length-prefixed with a single byte on the wire.
const SNI_MAX_LEN: usize = 255;

const DEFAULT_MIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Secure socket configuration. Create via [`Config::builder`].
#[derive(Clone)]
pub struct Config {
    security: SecurityConfig,
    min_version: MinVersion,
    handshake_timeouts: (Duration, Duration),
    server_name_indication: Option<String>,
    use_connection_id: bool,
    enabled_ciphersuites: Vec<CipherId>,
    session_buffer: Option<Arc<Mutex<SessionBuffer>>>,
    engine_hook: Option<EngineHook>,
}

/// Escape hatch invoked after all standard configuration is applied and
/// before the handshake context is created.
pub type EngineHook = Arc<dyn Fn(&mut dyn Engine) -> Result<(), EngineError> + Send + Sync>;

impl Config {
    pub fn builder(security: SecurityConfig) -> ConfigBuilder {
        ConfigBuilder {
            security,
            min_version: MinVersion::default(),
            handshake_timeouts: (DEFAULT_MIN_HANDSHAKE_TIMEOUT, DEFAULT_MAX_HANDSHAKE_TIMEOUT),
            server_name_indication: None,
            use_connection_id: false,
            enabled_ciphersuites: Vec::new(),
            session_buffer: None,
            engine_hook: None,
        }
    }

    #[inline(always)]
    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    #[inline(always)]
    pub fn min_version(&self) -> MinVersion {
        self.min_version
    }

    /// Handshake retransmission timeout range as (min, max).
    #[inline(always)]
    pub fn handshake_timeouts(&self) -> (Duration, Duration) {
        self.handshake_timeouts
    }

    #[inline(always)]
    pub fn server_name_indication(&self) -> Option<&str> {
        self.server_name_indication.as_deref()
    }

    #[inline(always)]
    pub fn use_connection_id(&self) -> bool {
        self.use_connection_id
    }

    #[inline(always)]
    pub fn enabled_ciphersuites(&self) -> &[CipherId] {
        &self.enabled_ciphersuites
    }

    #[inline(always)]
    pub fn session_buffer(&self) -> Option<&Arc<Mutex<SessionBuffer>>> {
        self.session_buffer.as_ref()
    }

    #[inline(always)]
    pub(crate) fn engine_hook(&self) -> Option<&EngineHook> {
        self.engine_hook.as_ref()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("security", &self.security.mode())
            .field("min_version", &self.min_version)
            .field("handshake_timeouts", &self.handshake_timeouts)
            .field("server_name_indication", &self.server_name_indication)
            .field("use_connection_id", &self.use_connection_id)
            .field("enabled_ciphersuites", &self.enabled_ciphersuites)
            .field("session_buffer", &self.session_buffer.is_some())
            .field("engine_hook", &self.engine_hook.is_some())
            .finish()
    }
}

/// Builder for [`Config`]. All validation happens in [`ConfigBuilder::build`].
#[derive(Clone)]
pub struct ConfigBuilder {
    security: SecurityConfig,
    min_version: MinVersion,
    handshake_timeouts: (Duration, Duration),
    server_name_indication: Option<String>,
    use_connection_id: bool,
    enabled_ciphersuites: Vec<CipherId>,
    session_buffer: Option<Arc<Mutex<SessionBuffer>>>,
    engine_hook: Option<EngineHook>,
}

impl ConfigBuilder {
    /// Minimum accepted protocol version. Defaults to the engine's lowest.
    pub fn min_version(mut self, version: MinVersion) -> Self {
        self.min_version = version;
        self
    }

    /// Handshake retransmission timeout range. Defaults to 1s..60s.
    pub fn handshake_timeouts(mut self, min: Duration, max: Duration) -> Self {
        self.handshake_timeouts = (min, max);
        self
    }

    /// Override the hostname sent in SNI and used for certificate matching.
    /// When unset, the hostname given to connect is used.
    pub fn server_name_indication(mut self, host: impl Into<String>) -> Self {
        self.server_name_indication = Some(host.into());
        self
    }

    /// Negotiate a connection id. Ignored on stream transports.
    pub fn use_connection_id(mut self, enabled: bool) -> Self {
        self.use_connection_id = enabled;
        self
    }

    /// Restrict negotiation to these ciphersuites. Empty means no
    /// restriction beyond what the security mode implies.
    pub fn enabled_ciphersuites(mut self, suites: Vec<CipherId>) -> Self {
        self.enabled_ciphersuites = suites;
        self
    }

    /// Attach a buffer for persisting the established session and for
    /// offering a previously persisted one on connect.
    pub fn session_buffer(mut self, buffer: Arc<Mutex<SessionBuffer>>) -> Self {
        self.session_buffer = Some(buffer);
        self
    }

    /// Run arbitrary extra engine configuration after the standard setup.
    pub fn engine_hook(
        mut self,
        hook: impl Fn(&mut dyn Engine) -> Result<(), EngineError> + Send + Sync + 'static,
    ) -> Self {
        self.engine_hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        let (min, max) = self.handshake_timeouts;
        if min > max {
            return Err(Error::Config(
                "minimum handshake timeout exceeds the maximum".into(),
            ));
        }
        // The engine takes the range as whole milliseconds in u32.
        if u32::try_from(min.as_millis()).is_err() || u32::try_from(max.as_millis()).is_err() {
            return Err(Error::Config(
                "handshake timeout does not fit the engine's millisecond range".into(),
            ));
        }

        if let Some(sni) = &self.server_name_indication {
            if sni.len() > SNI_MAX_LEN {
                return Err(Error::Range("server name indication"));
            }
        }

        Ok(Config {
            security: self.security,
            min_version: self.min_version,
            handshake_timeouts: self.handshake_timeouts,
            server_name_indication: self.server_name_indication,
            use_connection_id: self.use_connection_id,
            enabled_ciphersuites: self.enabled_ciphersuites,
            session_buffer: self.session_buffer,
            engine_hook: self.engine_hook,
        })
    }
}
