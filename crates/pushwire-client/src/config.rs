//! Client configuration
//!
//! `ClientConfig` is a plain struct with named fields. Start from
//! [`ClientConfig::new`] and override fields with struct update syntax:
//!
//! ```ignore
//! let config = ClientConfig {
//!     concurrent_connections: 4,
//!     ..ClientConfig::new(PRODUCTION_HOST, AuthStrategy::Token(signing_key))
//! };
//! ```
//!
//! [`ClientConfig::validate`] runs when the client is created, before any I/O.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pushwire_core::{ConfigError, MetricsListener, NoopMetricsListener, SigningKey};
use rustls::pki_types::CertificateDer;

use crate::transport::{ClientCertificate, ProxyConnector};

/// Production gateway host
pub const PRODUCTION_HOST: &str = "api.push.apple.com";

/// Development (sandbox) gateway host
pub const DEVELOPMENT_HOST: &str = "api.sandbox.push.apple.com";

/// Default HTTPS port
pub const DEFAULT_PORT: u16 = 443;

/// Alternate port for networks that block outbound 443
pub const ALTERNATE_PORT: u16 = 2197;

/// Default lifetime of a provider authentication token. The gateway refuses
/// tokens older than an hour and rate-limits tokens minted more often than
/// every twenty minutes.
pub const DEFAULT_TOKEN_EXPIRATION: Duration = Duration::from_secs(50 * 60);

/// How a client proves its identity to the gateway
#[derive(Clone)]
pub enum AuthStrategy {
    /// No credentials (local gateways)
    None,
    /// TLS client certificate presented during the handshake
    Certificate(Arc<ClientCertificate>),
    /// Signed bearer token attached to every request
    Token(Arc<SigningKey>),
}

impl AuthStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            AuthStrategy::None => "none",
            AuthStrategy::Certificate(_) => "certificate",
            AuthStrategy::Token(_) => "token",
        }
    }

    pub fn signing_key(&self) -> Option<&Arc<SigningKey>> {
        match self {
            AuthStrategy::Token(key) => Some(key),
            _ => None,
        }
    }

    pub fn client_certificate(&self) -> Option<&Arc<ClientCertificate>> {
        match self {
            AuthStrategy::Certificate(certificate) => Some(certificate),
            _ => None,
        }
    }
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::Token(key) => f.debug_tuple("Token").field(key).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// Transport security
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// TLS, trusting the bundled web PKI roots
    #[default]
    WebPki,
    /// TLS, trusting only the given certificates
    TrustedCertificates(Vec<CertificateDer<'static>>),
    /// HTTP/2 with prior knowledge over plain TCP
    Plaintext,
}

impl TlsMode {
    pub fn is_plaintext(&self) -> bool {
        matches!(self, TlsMode::Plaintext)
    }
}

/// Reconnect backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        let initial = Duration::from_millis(100);
        Self {
            initial,
            max: initial * 512,
        }
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    /// Gateway host name
    pub host: String,
    pub port: u16,
    pub auth: AuthStrategy,
    pub tls: TlsMode,

    /// Connections the pool keeps open
    pub concurrent_connections: usize,

    /// Bound on TCP connect, TLS and HTTP/2 handshakes together
    pub connect_timeout: Duration,

    /// How long a notification may wait for a writable connection
    pub acquire_timeout: Duration,

    /// Idle time after which a connection is pinged
    pub idle_ping_interval: Duration,

    /// How long in-flight streams may take to finish when a connection or
    /// the whole client closes
    pub graceful_shutdown_timeout: Duration,

    /// Lifetime of a cached authentication token
    pub token_expiration: Duration,

    pub backoff: BackoffConfig,

    /// Resend a notification once, on a fresh connection, after the gateway
    /// rejects it with `ExpiredProviderToken`
    pub retry_expired_tokens: bool,

    pub metrics: Arc<dyn MetricsListener>,

    /// Opens the raw byte stream in place of a direct TCP connection
    pub proxy: Option<Arc<dyn ProxyConnector>>,
}

impl ClientConfig {
    /// Configuration with defaults for everything but the host and credentials
    pub fn new(host: impl Into<String>, auth: AuthStrategy) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            auth,
            tls: TlsMode::default(),
            concurrent_connections: 1,
            connect_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(10),
            idle_ping_interval: Duration::from_secs(60),
            graceful_shutdown_timeout: Duration::from_secs(1),
            token_expiration: DEFAULT_TOKEN_EXPIRATION,
            backoff: BackoffConfig::default(),
            retry_expired_tokens: true,
            metrics: Arc::new(NoopMetricsListener),
            proxy: None,
        }
    }

    /// Check the configuration for values that can never work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.concurrent_connections == 0 {
            return Err(ConfigError::NoConnections);
        }

        let durations = [
            ("connect_timeout", self.connect_timeout),
            ("acquire_timeout", self.acquire_timeout),
            ("idle_ping_interval", self.idle_ping_interval),
            ("token_expiration", self.token_expiration),
            ("backoff.initial", self.backoff.initial),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::ZeroDuration(*name));
        }

        if self.backoff.max < self.backoff.initial {
            return Err(ConfigError::InvalidBackoff);
        }
        if matches!(self.auth, AuthStrategy::Certificate(_)) && self.tls.is_plaintext() {
            return Err(ConfigError::CertificateWithoutTls);
        }

        Ok(())
    }

    /// Value for the `:authority` pseudo-header
    pub fn authority(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// URI scheme matching the transport
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_plaintext() {
            "http"
        } else {
            "https"
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth", &self.auth)
            .field("tls", &self.tls)
            .field("concurrent_connections", &self.concurrent_connections)
            .field("connect_timeout", &self.connect_timeout)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_ping_interval", &self.idle_ping_interval)
            .field("graceful_shutdown_timeout", &self.graceful_shutdown_timeout)
            .field("token_expiration", &self.token_expiration)
            .field("backoff", &self.backoff)
            .field("retry_expired_tokens", &self.retry_expired_tokens)
            .field("proxy", &self.proxy.as_ref().map(|p| p.description()))
            .finish_non_exhaustive()
    }
}
