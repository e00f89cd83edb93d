//! File-based client settings
//!
//! [`ClientSettings`] is the serializable form of [`ClientConfig`]: durations
//! in milliseconds and credentials as file paths. Load it from JSON and turn
//! it into a config with [`ClientSettings::into_config`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pushwire_core::SigningKey;
use serde::{Deserialize, Serialize};

use crate::config::{
    AuthStrategy, BackoffConfig, ClientConfig, TlsMode, DEFAULT_PORT, PRODUCTION_HOST,
};
use crate::transport::{certificates_from_pem, ClientCertificate};

/// How the client authenticates, with credentials given as paths
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthSettings {
    #[default]
    None,
    Certificate {
        certificate_path: PathBuf,
        private_key_path: PathBuf,
    },
    Token {
        key_path: PathBuf,
        team_id: String,
        key_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub auth: AuthSettings,

    /// Speak HTTP/2 without TLS (local gateways only)
    pub plaintext: bool,

    /// PEM bundle to trust in place of the built-in web PKI roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_ca_path: Option<PathBuf>,

    pub concurrent_connections: usize,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    pub idle_ping_interval_ms: u64,
    pub graceful_shutdown_timeout_ms: u64,
    pub token_expiration_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub retry_expired_tokens: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let defaults = ClientConfig::new(PRODUCTION_HOST, AuthStrategy::None);
        Self {
            host: defaults.host,
            port: DEFAULT_PORT,
            auth: AuthSettings::None,
            plaintext: false,
            trusted_ca_path: None,
            concurrent_connections: defaults.concurrent_connections,
            connect_timeout_ms: millis(defaults.connect_timeout),
            acquire_timeout_ms: millis(defaults.acquire_timeout),
            idle_ping_interval_ms: millis(defaults.idle_ping_interval),
            graceful_shutdown_timeout_ms: millis(defaults.graceful_shutdown_timeout),
            token_expiration_ms: millis(defaults.token_expiration),
            backoff_initial_ms: millis(defaults.backoff.initial),
            backoff_max_ms: millis(defaults.backoff.max),
            retry_expired_tokens: defaults.retry_expired_tokens,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

impl ClientSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid client settings")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("In {}", path.display()))
    }

    /// Load the referenced credentials and build a validated [`ClientConfig`]
    pub fn into_config(self) -> Result<ClientConfig> {
        let auth = match &self.auth {
            AuthSettings::None => AuthStrategy::None,
            AuthSettings::Certificate {
                certificate_path,
                private_key_path,
            } => {
                let certificate =
                    ClientCertificate::from_pem_files(certificate_path, private_key_path)
                        .with_context(|| {
                            format!(
                                "Failed to load client certificate {}",
                                certificate_path.display()
                            )
                        })?;
                AuthStrategy::Certificate(Arc::new(certificate))
            }
            AuthSettings::Token {
                key_path,
                team_id,
                key_id,
            } => {
                let key = SigningKey::from_pkcs8_file(key_path, team_id.clone(), key_id.clone())
                    .with_context(|| format!("Failed to load signing key {}", key_path.display()))?;
                AuthStrategy::Token(Arc::new(key))
            }
        };

        let tls = if self.plaintext {
            TlsMode::Plaintext
        } else if let Some(path) = &self.trusted_ca_path {
            let pem = std::fs::read(path)
                .with_context(|| format!("Failed to read trusted CAs from {}", path.display()))?;
            let roots = certificates_from_pem(&pem)
                .with_context(|| format!("Invalid trusted CAs in {}", path.display()))?;
            TlsMode::TrustedCertificates(roots)
        } else {
            TlsMode::WebPki
        };

        let mut config = ClientConfig::new(self.host, auth);
        config.port = self.port;
        config.tls = tls;
        config.concurrent_connections = self.concurrent_connections;
        config.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        config.acquire_timeout = Duration::from_millis(self.acquire_timeout_ms);
        config.idle_ping_interval = Duration::from_millis(self.idle_ping_interval_ms);
        config.graceful_shutdown_timeout = Duration::from_millis(self.graceful_shutdown_timeout_ms);
        config.token_expiration = Duration::from_millis(self.token_expiration_ms);
        config.backoff = BackoffConfig {
            initial: Duration::from_millis(self.backoff_initial_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        };
        config.retry_expired_tokens = self.retry_expired_tokens;

        config.validate()?;
        Ok(config)
    }
}
