//! Metrics listener
//!
//! A side channel for operational visibility. It is never the source of truth
//! for an individual notification's outcome; that is always the notification's
//! own future.
//!
//! Every notification that is written reports `sent` exactly once, and every
//! notification reports exactly one terminal event (accepted, rejected, or
//! write failure), including notifications that are transparently resent
//! after an expired-token rejection.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives delivery and connection events from a client.
///
/// All methods default to no-ops. Implementations are called from connection
/// tasks and must not block.
pub trait MetricsListener: Send + Sync {
    /// The notification failed without a gateway verdict
    fn handle_write_failure(&self, _notification_id: u64) {}

    /// The notification was written to a connection
    fn handle_notification_sent(&self, _notification_id: u64) {}

    fn handle_notification_accepted(&self, _notification_id: u64) {}

    fn handle_notification_rejected(&self, _notification_id: u64) {}

    fn handle_connection_added(&self) {}

    fn handle_connection_removed(&self) {}

    fn handle_connection_creation_failed(&self) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsListener;

impl MetricsListener for NoopMetricsListener {}

/// Point-in-time copy of a [`CountingMetricsListener`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub write_failures: u64,
    pub sent: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub connections_added: u64,
    pub connections_removed: u64,
    pub connection_creation_failures: u64,
}

impl MetricsSnapshot {
    /// Notifications that have reached a terminal state
    pub fn completed(&self) -> u64 {
        self.accepted + self.rejected + self.write_failures
    }
}

/// Listener that keeps running totals
#[derive(Debug, Default)]
pub struct CountingMetricsListener {
    write_failures: AtomicU64,
    sent: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    connections_added: AtomicU64,
    connections_removed: AtomicU64,
    connection_creation_failures: AtomicU64,
}

impl CountingMetricsListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            write_failures: self.write_failures.load(Ordering::SeqCst),
            sent: self.sent.load(Ordering::SeqCst),
            accepted: self.accepted.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            connections_added: self.connections_added.load(Ordering::SeqCst),
            connections_removed: self.connections_removed.load(Ordering::SeqCst),
            connection_creation_failures: self.connection_creation_failures.load(Ordering::SeqCst),
        }
    }
}

impl MetricsListener for CountingMetricsListener {
    fn handle_write_failure(&self, _notification_id: u64) {
        self.write_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_notification_sent(&self, _notification_id: u64) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_notification_accepted(&self, _notification_id: u64) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_notification_rejected(&self, _notification_id: u64) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_connection_added(&self) {
        self.connections_added.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_connection_removed(&self) {
        self.connections_removed.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_connection_creation_failed(&self) {
        self.connection_creation_failures.fetch_add(1, Ordering::SeqCst);
    }
}
