//! Observer for the mock gateway's decisions

use chrono::{DateTime, Utc};
use pushwire_core::RejectionReason;

use crate::handler::NotificationRequest;

/// Told about every notification the mock gateway answers. Called from the
/// stream's task, so implementations should be quick.
pub trait MockGatewayListener: Send + Sync {
    fn handle_notification_accepted(&self, request: &NotificationRequest);

    fn handle_notification_rejected(
        &self,
        request: &NotificationRequest,
        reason: &RejectionReason,
        timestamp: Option<DateTime<Utc>>,
    );
}
