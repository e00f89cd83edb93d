//! Wire format shared by the client and the mock gateway

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::domain::RejectionReason;

pub const HEADER_EXPIRATION: &str = "apns-expiration";
pub const HEADER_TOPIC: &str = "apns-topic";
pub const HEADER_PRIORITY: &str = "apns-priority";
pub const HEADER_PUSH_TYPE: &str = "apns-push-type";
pub const HEADER_COLLAPSE_ID: &str = "apns-collapse-id";
pub const HEADER_APNS_ID: &str = "apns-id";
pub const HEADER_UNIQUE_ID: &str = "apns-unique-id";
pub const HEADER_AUTHORIZATION: &str = "authorization";

/// Request path prefix; the device token follows it
pub const DEVICE_PATH_PREFIX: &str = "/3/device/";

/// Largest payload the gateway accepts, in bytes
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// Longest collapse id the gateway accepts, in bytes
pub const MAX_COLLAPSE_ID_LENGTH: usize = 64;

/// Timestamps below this are taken to be seconds rather than milliseconds
const SECONDS_THRESHOLD: i64 = 100_000_000_000;

/// Request path for a device token
pub fn device_path(token: &str) -> String {
    format!("{}{}", DEVICE_PATH_PREFIX, token)
}

/// Value of the `apns-expiration` header; `0` means "deliver once or not at all"
pub fn expiration_header_value(expiration: Option<DateTime<Utc>>) -> String {
    expiration
        .map(|instant| instant.timestamp().max(0))
        .unwrap_or(0)
        .to_string()
}

/// Decoded JSON error body of a non-2xx response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    pub reason: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ErrorBody {
    /// Decode an error body. Anything malformed degrades to `None` rather
    /// than failing.
    pub fn decode(body: &[u8]) -> Self {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(_) => return Self::default(),
        };

        let reason = value
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string);
        let timestamp = value
            .get("timestamp")
            .and_then(|ts| ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64)))
            .and_then(timestamp_from_epoch);

        Self { reason, timestamp }
    }

    /// Encode an error body the way the gateway does (timestamp in milliseconds)
    pub fn encode(reason: &RejectionReason, timestamp: Option<DateTime<Utc>>) -> Vec<u8> {
        let body = match timestamp {
            Some(timestamp) => json!({
                "reason": reason.as_str(),
                "timestamp": timestamp.timestamp_millis(),
            }),
            None => json!({ "reason": reason.as_str() }),
        };
        body.to_string().into_bytes()
    }
}

fn timestamp_from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value < 0 {
        return None;
    }
    if value < SECONDS_THRESHOLD {
        Utc.timestamp_opt(value, 0).single()
    } else {
        Utc.timestamp_millis_opt(value).single()
    }
}
