//! Push client facade

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pushwire_core::{ConfigError, IdSequence, MetricsListener, PushError, PushNotification};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{PendingNotification, PushNotificationFuture};
use crate::pool::ConnectionPool;
use crate::transport::Connector;

/// Sends push notifications to a gateway.
///
/// Cheap to share behind an `Arc`; every method takes `&self`. Must be
/// created inside a Tokio runtime, which runs the pool and its connections.
pub struct PushClient {
    pool: ConnectionPool,
    ids: IdSequence,
    metrics: Arc<dyn MetricsListener>,
    closed: AtomicBool,
    description: String,
}

impl PushClient {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Handle::try_current().map_err(|_| ConfigError::MissingRuntime)?;

        let connector = Connector::new(&config)?;
        let description = connector.description();
        info!(
            "[PushClient] Created for {} ({} auth, {} connection(s))",
            description,
            config.auth.name(),
            config.concurrent_connections
        );

        let pool = ConnectionPool::start(&config, connector);
        Ok(Self {
            pool,
            ids: IdSequence::new(),
            metrics: config.metrics.clone(),
            closed: AtomicBool::new(false),
            description,
        })
    }

    /// Submit a notification. The returned future resolves once the gateway
    /// has answered, or with an error if it never will.
    pub fn send(&self, notification: impl Into<Arc<PushNotification>>) -> PushNotificationFuture {
        if self.is_closed() {
            return PushNotificationFuture::failed(PushError::ClientClosed);
        }

        let id = self.ids.next_id();
        let (pending, future) =
            PendingNotification::new(id, notification.into(), self.metrics.clone());
        self.pool.submit(pending);
        future
    }

    /// Stop accepting notifications and close every connection.
    ///
    /// Streams still in flight get the configured grace period to finish;
    /// whatever is left after that fails. Calling this again waits for the
    /// same shutdown.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("[PushClient] Closing client for {}", self.description);
        }
        self.pool.shutdown().await;
        debug!("[PushClient] Closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pool.shutdown_in_background();
        }
    }
}
