//! Connections to the gateway
//!
//! One [`handler::ConnectionHandler`] task owns each HTTP/2 connection. All
//! of that connection's state (stream correlator, cached token, lifecycle)
//! is touched only from its task, so none of it needs a lock.

mod correlator;
mod handler;
mod keepalive;
mod pending;
mod request;
mod token;

use std::sync::Arc;
use std::time::Duration;

use pushwire_core::SigningKey;

use crate::config::ClientConfig;

pub(crate) use handler::{ConnectionHandle, ConnectionHandler};
pub(crate) use pending::PendingNotification;
pub use pending::PushNotificationFuture;

/// Lifecycle of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Accepting new streams
    Connected,
    /// No new streams; in-flight ones may finish until a deadline
    Draining,
}

/// Per-connection settings derived from the client configuration
#[derive(Debug, Clone)]
pub(crate) struct HandlerSettings {
    pub(crate) scheme: &'static str,
    pub(crate) authority: String,
    pub(crate) signing_key: Option<Arc<SigningKey>>,
    pub(crate) token_expiration: Duration,
    pub(crate) idle_ping_interval: Duration,
    pub(crate) graceful_shutdown_timeout: Duration,
    pub(crate) retry_expired_tokens: bool,
}

impl HandlerSettings {
    pub(crate) fn from_config(config: &ClientConfig) -> Self {
        Self {
            scheme: config.scheme(),
            authority: config.authority(),
            signing_key: config.auth.signing_key().cloned(),
            token_expiration: config.token_expiration,
            idle_ping_interval: config.idle_ping_interval,
            graceful_shutdown_timeout: config.graceful_shutdown_timeout,
            retry_expired_tokens: config.retry_expired_tokens,
        }
    }
}
