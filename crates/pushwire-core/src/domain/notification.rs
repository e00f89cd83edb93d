//! Push notification entity
//!
//! A notification is immutable once submitted. The client passes it around as
//! `Arc<PushNotification>` so identity is by reference: two notifications with
//! identical fields are never deduplicated.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery priority requested from the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPriority {
    /// Deliver right away
    #[default]
    Immediate,
    /// Deliver when convenient for the device's battery
    ConservePower,
}

impl DeliveryPriority {
    /// Numeric value sent in the `apns-priority` header
    pub fn code(self) -> u8 {
        match self {
            DeliveryPriority::Immediate => 10,
            DeliveryPriority::ConservePower => 5,
        }
    }

    /// Parse the numeric header value
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            10 => Some(DeliveryPriority::Immediate),
            5 => Some(DeliveryPriority::ConservePower),
            _ => None,
        }
    }
}

/// Push type tag sent in the `apns-push-type` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushType {
    Alert,
    Background,
    Location,
    Voip,
    Complication,
    FileProvider,
    Mdm,
    LiveActivity,
    PushToTalk,
}

impl PushType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushType::Alert => "alert",
            PushType::Background => "background",
            PushType::Location => "location",
            PushType::Voip => "voip",
            PushType::Complication => "complication",
            PushType::FileProvider => "fileprovider",
            PushType::Mdm => "mdm",
            PushType::LiveActivity => "liveactivity",
            PushType::PushToTalk => "pushtotalk",
        }
    }
}

impl fmt::Display for PushType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alert" => Ok(PushType::Alert),
            "background" => Ok(PushType::Background),
            "location" => Ok(PushType::Location),
            "voip" => Ok(PushType::Voip),
            "complication" => Ok(PushType::Complication),
            "fileprovider" => Ok(PushType::FileProvider),
            "mdm" => Ok(PushType::Mdm),
            "liveactivity" => Ok(PushType::LiveActivity),
            "pushtotalk" => Ok(PushType::PushToTalk),
            other => Err(format!("Unknown push type: {}", other)),
        }
    }
}

/// A notification addressed to one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    /// Hex device token
    pub token: String,

    /// Topic, usually the app's bundle id
    pub topic: String,

    /// JSON payload, sent unmodified
    pub payload: String,

    /// Instant after which the gateway should stop trying to deliver
    pub expiration: Option<DateTime<Utc>>,

    pub priority: DeliveryPriority,

    pub push_type: Option<PushType>,

    /// Lets the gateway supersede an undelivered notification with the same id
    pub collapse_id: Option<String>,

    /// Caller-supplied unique id, echoed back by the gateway
    pub apns_id: Option<Uuid>,
}

impl PushNotification {
    /// Create a notification with immediate priority and no optional fields
    pub fn new(
        token: impl Into<String>,
        topic: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            topic: topic.into(),
            payload: payload.into(),
            expiration: None,
            priority: DeliveryPriority::Immediate,
            push_type: None,
            collapse_id: None,
            apns_id: None,
        }
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_priority(mut self, priority: DeliveryPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_push_type(mut self, push_type: PushType) -> Self {
        self.push_type = Some(push_type);
        self
    }

    pub fn with_collapse_id(mut self, collapse_id: impl Into<String>) -> Self {
        self.collapse_id = Some(collapse_id.into());
        self
    }

    pub fn with_apns_id(mut self, apns_id: Uuid) -> Self {
        self.apns_id = Some(apns_id);
        self
    }
}

/// Strip everything but hex digits from a device token string.
///
/// Tokens copied out of device logs often arrive as `<740f4707 bebcf74f ...>`.
pub fn sanitize_device_token(token: &str) -> String {
    token.chars().filter(|c| c.is_ascii_hexdigit()).collect()
}
