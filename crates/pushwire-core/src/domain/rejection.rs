//! Rejection reasons reported by the gateway
//!
//! Each reason has a canonical HTTP status. Unknown reason strings are kept
//! verbatim in [`RejectionReason::Other`] so newer gateway releases never make
//! a response unreadable.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    BadCollapseId,
    BadDeviceToken,
    BadExpirationDate,
    BadMessageId,
    BadPriority,
    BadTopic,
    DeviceTokenNotForTopic,
    DuplicateHeaders,
    IdleTimeout,
    MissingDeviceToken,
    MissingTopic,
    PayloadEmpty,
    TopicDisallowed,
    BadCertificate,
    BadCertificateEnvironment,
    ExpiredProviderToken,
    Forbidden,
    InvalidProviderToken,
    MissingProviderToken,
    BadPath,
    MethodNotAllowed,
    Unregistered,
    PayloadTooLarge,
    TooManyProviderTokenUpdates,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    Shutdown,
    /// A reason string this library does not know about
    Other(String),
}

const KNOWN_REASONS: &[RejectionReason] = &[
    RejectionReason::BadCollapseId,
    RejectionReason::BadDeviceToken,
    RejectionReason::BadExpirationDate,
    RejectionReason::BadMessageId,
    RejectionReason::BadPriority,
    RejectionReason::BadTopic,
    RejectionReason::DeviceTokenNotForTopic,
    RejectionReason::DuplicateHeaders,
    RejectionReason::IdleTimeout,
    RejectionReason::MissingDeviceToken,
    RejectionReason::MissingTopic,
    RejectionReason::PayloadEmpty,
    RejectionReason::TopicDisallowed,
    RejectionReason::BadCertificate,
    RejectionReason::BadCertificateEnvironment,
    RejectionReason::ExpiredProviderToken,
    RejectionReason::Forbidden,
    RejectionReason::InvalidProviderToken,
    RejectionReason::MissingProviderToken,
    RejectionReason::BadPath,
    RejectionReason::MethodNotAllowed,
    RejectionReason::Unregistered,
    RejectionReason::PayloadTooLarge,
    RejectionReason::TooManyProviderTokenUpdates,
    RejectionReason::TooManyRequests,
    RejectionReason::InternalServerError,
    RejectionReason::ServiceUnavailable,
    RejectionReason::Shutdown,
];

impl RejectionReason {
    /// Reason string as it appears in the gateway's JSON body
    pub fn as_str(&self) -> &str {
        match self {
            RejectionReason::BadCollapseId => "BadCollapseId",
            RejectionReason::BadDeviceToken => "BadDeviceToken",
            RejectionReason::BadExpirationDate => "BadExpirationDate",
            RejectionReason::BadMessageId => "BadMessageId",
            RejectionReason::BadPriority => "BadPriority",
            RejectionReason::BadTopic => "BadTopic",
            RejectionReason::DeviceTokenNotForTopic => "DeviceTokenNotForTopic",
            RejectionReason::DuplicateHeaders => "DuplicateHeaders",
            RejectionReason::IdleTimeout => "IdleTimeout",
            RejectionReason::MissingDeviceToken => "MissingDeviceToken",
            RejectionReason::MissingTopic => "MissingTopic",
            RejectionReason::PayloadEmpty => "PayloadEmpty",
            RejectionReason::TopicDisallowed => "TopicDisallowed",
            RejectionReason::BadCertificate => "BadCertificate",
            RejectionReason::BadCertificateEnvironment => "BadCertificateEnvironment",
            RejectionReason::ExpiredProviderToken => "ExpiredProviderToken",
            RejectionReason::Forbidden => "Forbidden",
            RejectionReason::InvalidProviderToken => "InvalidProviderToken",
            RejectionReason::MissingProviderToken => "MissingProviderToken",
            RejectionReason::BadPath => "BadPath",
            RejectionReason::MethodNotAllowed => "MethodNotAllowed",
            RejectionReason::Unregistered => "Unregistered",
            RejectionReason::PayloadTooLarge => "PayloadTooLarge",
            RejectionReason::TooManyProviderTokenUpdates => "TooManyProviderTokenUpdates",
            RejectionReason::TooManyRequests => "TooManyRequests",
            RejectionReason::InternalServerError => "InternalServerError",
            RejectionReason::ServiceUnavailable => "ServiceUnavailable",
            RejectionReason::Shutdown => "Shutdown",
            RejectionReason::Other(reason) => reason,
        }
    }

    /// Parse a reason string, falling back to [`RejectionReason::Other`]
    pub fn parse(reason: &str) -> Self {
        KNOWN_REASONS
            .iter()
            .find(|known| known.as_str() == reason)
            .cloned()
            .unwrap_or_else(|| RejectionReason::Other(reason.to_string()))
    }

    /// HTTP status the gateway pairs with this reason
    pub fn status_code(&self) -> u16 {
        match self {
            RejectionReason::BadCollapseId
            | RejectionReason::BadDeviceToken
            | RejectionReason::BadExpirationDate
            | RejectionReason::BadMessageId
            | RejectionReason::BadPriority
            | RejectionReason::BadTopic
            | RejectionReason::DeviceTokenNotForTopic
            | RejectionReason::DuplicateHeaders
            | RejectionReason::IdleTimeout
            | RejectionReason::MissingDeviceToken
            | RejectionReason::MissingTopic
            | RejectionReason::PayloadEmpty
            | RejectionReason::TopicDisallowed
            | RejectionReason::Other(_) => 400,
            RejectionReason::BadCertificate
            | RejectionReason::BadCertificateEnvironment
            | RejectionReason::ExpiredProviderToken
            | RejectionReason::Forbidden
            | RejectionReason::InvalidProviderToken
            | RejectionReason::MissingProviderToken => 403,
            RejectionReason::BadPath => 404,
            RejectionReason::MethodNotAllowed => 405,
            RejectionReason::Unregistered => 410,
            RejectionReason::PayloadTooLarge => 413,
            RejectionReason::TooManyProviderTokenUpdates | RejectionReason::TooManyRequests => 429,
            RejectionReason::InternalServerError => 500,
            RejectionReason::ServiceUnavailable | RejectionReason::Shutdown => 503,
        }
    }

    /// Whether the gateway is going away or overloaded and the connection
    /// that carried this response should be replaced
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            RejectionReason::ExpiredProviderToken
                | RejectionReason::ServiceUnavailable
                | RejectionReason::Shutdown
        )
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RejectionReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RejectionReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let reason = String::deserialize(deserializer)?;
        Ok(RejectionReason::parse(&reason))
    }
}
