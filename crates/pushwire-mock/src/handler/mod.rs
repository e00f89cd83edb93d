//! Acceptance policies
//!
//! A [`PushNotificationHandler`] looks at one notification at a time and
//! either accepts it or names the reason it is rejected. Handlers are
//! created per connection, so they may keep per-connection state.

mod accept_all;
mod validating;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method};
use pushwire_core::RejectionReason;
use thiserror::Error;

pub use accept_all::AcceptAllHandlerFactory;
pub use validating::ValidatingHandlerFactory;

/// A notification as received by the gateway
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub payload: Bytes,
}

impl NotificationRequest {
    /// Header value as a string, if present and valid ASCII
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("Rejected: {reason}")]
    Rejected {
        reason: RejectionReason,
        /// When the device token stopped being valid (`Unregistered` only)
        timestamp: Option<DateTime<Utc>>,
    },

    #[error("Handler failed: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn rejected(reason: RejectionReason) -> Self {
        HandlerError::Rejected {
            reason,
            timestamp: None,
        }
    }

    pub fn unregistered(timestamp: DateTime<Utc>) -> Self {
        HandlerError::Rejected {
            reason: RejectionReason::Unregistered,
            timestamp: Some(timestamp),
        }
    }
}

pub trait PushNotificationHandler: Send {
    fn handle_notification(&mut self, request: &NotificationRequest) -> Result<(), HandlerError>;
}

/// Builds one handler per accepted connection
pub trait PushNotificationHandlerFactory: Send + Sync {
    fn build_handler(&self) -> Box<dyn PushNotificationHandler>;
}
