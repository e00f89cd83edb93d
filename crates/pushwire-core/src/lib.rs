//! # Pushwire Core Library
//!
//! Domain types shared by the push client and the mock gateway.
//!
//! ## Modules
//!
//! - `domain` - Notifications, delivery responses and rejection reasons
//! - `auth` - Provider signing keys and bearer authentication tokens
//! - `error` - Error taxonomy for notifications, credentials and configuration
//! - `metrics` - Side-channel listener for delivery and connection metrics
//! - `sequence` - Injected id generators for notifications and connections
//! - `wire` - Header names, request paths and the error body codec

pub mod auth;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod sequence;
pub mod wire;

// Re-export commonly used types
pub use auth::{AuthenticationToken, SigningKey, VerificationKey};
pub use domain::*;
pub use error::{ConfigError, CredentialError, PushError, TokenError};
pub use metrics::{CountingMetricsListener, MetricsListener, MetricsSnapshot, NoopMetricsListener};
pub use sequence::IdSequence;
