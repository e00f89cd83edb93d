//! Error types
//!
//! `PushError` is what a caller sees when a notification never got a gateway
//! verdict. Credential and configuration errors surface before any I/O and
//! are never retried.

use thiserror::Error;

/// Failure of a single notification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("Client has been closed")]
    ClientClosed,

    #[error("Failed to write notification: {0}")]
    WriteFailed(String),

    #[error("Stream closed before a reply was received")]
    StreamClosedBeforeReply,

    /// The gateway refused the stream or announced it would not process it,
    /// so the notification can be resent without risk of a duplicate.
    #[error("Gateway did not process the notification")]
    NotProcessed,

    #[error("Gateway reported an internal error (status {status})")]
    InternalServerError {
        status: u16,
        reason: Option<String>,
    },

    #[error("Timed out waiting for a writable connection")]
    AcquireTimeout,

    #[error("Could not connect to gateway: {0}")]
    ConnectionFailed(String),
}

impl PushError {
    /// Whether resending the same notification later may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PushError::ClientClosed)
    }
}

/// Failure to load or use key material
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to read credentials from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed PEM data: {0}")]
    Pem(String),

    #[error("No {0} found in PEM data")]
    Missing(&'static str),

    #[error("Key rejected: {0}")]
    Rejected(String),

    #[error("Signing failed")]
    Signing,
}

/// Failure to build, parse or check a provider authentication token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token must have three dot-separated segments")]
    Malformed,

    #[error("Token segment is not valid base64url: {0}")]
    Encoding(String),

    #[error("Token segment is not valid JSON: {0}")]
    Json(String),

    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Failed to sign token")]
    Signing,
}

/// Configuration rejected at construction time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Gateway host must not be empty")]
    EmptyHost,

    #[error("At least one concurrent connection is required")]
    NoConnections,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Backoff maximum must not be smaller than its initial delay")]
    InvalidBackoff,

    #[error("Client certificate authentication requires TLS")]
    CertificateWithoutTls,

    #[error("Invalid TLS configuration: {0}")]
    Tls(String),

    #[error("Client must be created from within a Tokio runtime")]
    MissingRuntime,
}
