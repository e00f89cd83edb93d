//! Gateway response to a single notification

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{PushNotification, RejectionReason};

/// Outcome of one notification that reached the gateway.
///
/// Failures that never produced a gateway reply (write failures, lost
/// connections) are reported as [`crate::PushError`] instead.
#[derive(Debug, Clone)]
pub struct PushNotificationResponse {
    notification: Arc<PushNotification>,
    accepted: bool,
    status: u16,
    apns_id: Option<Uuid>,
    apns_unique_id: Option<Uuid>,
    rejection_reason: Option<RejectionReason>,
    token_invalidation_timestamp: Option<DateTime<Utc>>,
}

impl PushNotificationResponse {
    pub fn accepted(
        notification: Arc<PushNotification>,
        status: u16,
        apns_id: Option<Uuid>,
        apns_unique_id: Option<Uuid>,
    ) -> Self {
        Self {
            notification,
            accepted: true,
            status,
            apns_id,
            apns_unique_id,
            rejection_reason: None,
            token_invalidation_timestamp: None,
        }
    }

    pub fn rejected(
        notification: Arc<PushNotification>,
        status: u16,
        apns_id: Option<Uuid>,
        rejection_reason: Option<RejectionReason>,
        token_invalidation_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            notification,
            accepted: false,
            status,
            apns_id,
            apns_unique_id: None,
            rejection_reason,
            token_invalidation_timestamp,
        }
    }

    /// The notification this response belongs to (same allocation that was submitted)
    pub fn notification(&self) -> &Arc<PushNotification> {
        &self.notification
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Id echoed or assigned by the gateway
    pub fn apns_id(&self) -> Option<Uuid> {
        self.apns_id
    }

    /// Id the gateway assigns for delivery-log lookups (development gateways only)
    pub fn apns_unique_id(&self) -> Option<Uuid> {
        self.apns_unique_id
    }

    pub fn rejection_reason(&self) -> Option<&RejectionReason> {
        self.rejection_reason.as_ref()
    }

    /// When the device token stopped being valid; only set for `Unregistered`
    pub fn token_invalidation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.token_invalidation_timestamp
    }
}
