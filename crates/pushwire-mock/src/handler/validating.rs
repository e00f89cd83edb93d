//! Validating acceptance policy
//!
//! Checks notifications the way the production gateway does, in the same
//! order, so the first problem found is the reason reported.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use http::Method;
use pushwire_core::wire::{
    DEVICE_PATH_PREFIX, HEADER_APNS_ID, HEADER_AUTHORIZATION, HEADER_COLLAPSE_ID,
    HEADER_PRIORITY, HEADER_TOPIC, MAX_COLLAPSE_ID_LENGTH, MAX_PAYLOAD_SIZE,
};
use pushwire_core::{AuthenticationToken, DeliveryPriority, RejectionReason, VerificationKey};
use tracing::debug;
use uuid::Uuid;

use super::{
    HandlerError, NotificationRequest, PushNotificationHandler, PushNotificationHandlerFactory,
};

/// Provider tokens are honoured for this long after they are issued
const TOKEN_LIFETIME_HOURS: i64 = 1;

const BEARER: &str = "bearer";

const DEVICE_TOKEN_LENGTH: usize = 64;

/// Topic suffixes a certificate for a base topic also covers
const CERTIFICATE_TOPIC_SUFFIXES: [&str; 2] = [".voip", ".complication"];

#[derive(Debug, Clone)]
enum Authentication {
    /// TLS client certificates; the connection may push to these topics
    Certificate { allowed_topics: HashSet<String> },
    /// Bearer tokens, verified by key id, each key limited to its topics
    Token {
        keys: HashMap<String, VerificationKey>,
        topics_by_key_id: HashMap<String, HashSet<String>>,
    },
}

#[derive(Debug, Clone)]
struct Registry {
    authentication: Authentication,
    device_tokens_by_topic: HashMap<String, HashSet<String>>,
    expired_device_tokens: HashMap<String, DateTime<Utc>>,
}

/// Builds handlers that validate notifications against registered device
/// tokens, topics and credentials
#[derive(Debug, Clone)]
pub struct ValidatingHandlerFactory {
    registry: Registry,
}

impl ValidatingHandlerFactory {
    /// Certificate authentication for `base_topic` and its VoIP and
    /// complication topics
    pub fn certificate(base_topic: &str) -> Self {
        let allowed_topics = std::iter::once(base_topic.to_string())
            .chain(
                CERTIFICATE_TOPIC_SUFFIXES
                    .iter()
                    .map(|suffix| format!("{}{}", base_topic, suffix)),
            )
            .collect();

        Self::with_authentication(Authentication::Certificate { allowed_topics })
    }

    /// Token authentication with no keys registered yet
    pub fn token() -> Self {
        Self::with_authentication(Authentication::Token {
            keys: HashMap::new(),
            topics_by_key_id: HashMap::new(),
        })
    }

    fn with_authentication(authentication: Authentication) -> Self {
        Self {
            registry: Registry {
                authentication,
                device_tokens_by_topic: HashMap::new(),
                expired_device_tokens: HashMap::new(),
            },
        }
    }

    /// Trust tokens signed by `key` for the given topics. Has no effect with
    /// certificate authentication.
    pub fn with_verification_key<I, S>(mut self, key: VerificationKey, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Authentication::Token {
            keys,
            topics_by_key_id,
        } = &mut self.registry.authentication
        {
            let key_id = key.key_id().to_string();
            topics_by_key_id
                .entry(key_id.clone())
                .or_default()
                .extend(topics.into_iter().map(Into::into));
            keys.insert(key_id, key);
        }
        self
    }

    pub fn with_device_token(
        mut self,
        topic: impl Into<String>,
        device_token: impl Into<String>,
    ) -> Self {
        self.registry
            .device_tokens_by_topic
            .entry(topic.into())
            .or_default()
            .insert(device_token.into());
        self
    }

    /// Report `device_token` as unregistered since `expired_at`
    pub fn with_expired_device_token(
        mut self,
        device_token: impl Into<String>,
        expired_at: DateTime<Utc>,
    ) -> Self {
        self.registry
            .expired_device_tokens
            .insert(device_token.into(), expired_at);
        self
    }
}

impl PushNotificationHandlerFactory for ValidatingHandlerFactory {
    fn build_handler(&self) -> Box<dyn PushNotificationHandler> {
        Box::new(ValidatingHandler {
            registry: Arc::new(self.registry.clone()),
            expected_team_id: None,
            expired_token_seen: false,
        })
    }
}

struct ValidatingHandler {
    registry: Arc<Registry>,
    /// The gateway allows one team per connection: the first to authenticate
    expected_team_id: Option<String>,
    /// After an expired token the gateway refuses everything else on the
    /// connection
    expired_token_seen: bool,
}

impl PushNotificationHandler for ValidatingHandler {
    fn handle_notification(&mut self, request: &NotificationRequest) -> Result<(), HandlerError> {
        if self.expired_token_seen {
            return Err(HandlerError::rejected(RejectionReason::ExpiredProviderToken));
        }

        let result = self.validate(request);
        if let Err(HandlerError::Rejected {
            reason: RejectionReason::ExpiredProviderToken,
            ..
        }) = &result
        {
            debug!("[MockGateway] Provider token expired, wedging connection");
            self.expired_token_seen = true;
        }
        result
    }
}

impl ValidatingHandler {
    fn validate(&mut self, request: &NotificationRequest) -> Result<(), HandlerError> {
        if let Some(apns_id) = request.header(HEADER_APNS_ID) {
            Uuid::parse_str(apns_id).map_err(|_| reject(RejectionReason::BadMessageId))?;
        }

        if request.method != Method::POST {
            return Err(reject(RejectionReason::MethodNotAllowed));
        }

        let topic = request
            .header(HEADER_TOPIC)
            .ok_or_else(|| reject(RejectionReason::MissingTopic))?;

        if request
            .header(HEADER_COLLAPSE_ID)
            .is_some_and(|collapse_id| collapse_id.len() > MAX_COLLAPSE_ID_LENGTH)
        {
            return Err(reject(RejectionReason::BadCollapseId));
        }

        if let Some(priority) = request.header(HEADER_PRIORITY) {
            priority
                .parse::<u8>()
                .ok()
                .and_then(DeliveryPriority::from_code)
                .ok_or_else(|| reject(RejectionReason::BadPriority))?;
        }

        self.validate_device_token(&request.path, topic)?;
        self.validate_authentication(request, topic)?;

        if request.payload.is_empty() {
            return Err(reject(RejectionReason::PayloadEmpty));
        }
        if request.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(reject(RejectionReason::PayloadTooLarge));
        }

        Ok(())
    }

    fn validate_device_token(&self, path: &str, topic: &str) -> Result<(), HandlerError> {
        let device_token = path
            .strip_prefix(DEVICE_PATH_PREFIX)
            .ok_or_else(|| reject(RejectionReason::BadPath))?;

        if device_token.is_empty() {
            return Err(reject(RejectionReason::MissingDeviceToken));
        }
        if device_token.len() != DEVICE_TOKEN_LENGTH || hex::decode(device_token).is_err() {
            return Err(reject(RejectionReason::BadDeviceToken));
        }

        if let Some(expired_at) = self.registry.expired_device_tokens.get(device_token) {
            return Err(HandlerError::unregistered(*expired_at));
        }

        let registered = self
            .registry
            .device_tokens_by_topic
            .get(topic)
            .is_some_and(|tokens| tokens.contains(device_token));
        if !registered {
            return Err(reject(RejectionReason::DeviceTokenNotForTopic));
        }

        Ok(())
    }

    fn validate_authentication(
        &mut self,
        request: &NotificationRequest,
        topic: &str,
    ) -> Result<(), HandlerError> {
        match &self.registry.authentication {
            Authentication::Certificate { allowed_topics } => {
                if !allowed_topics.contains(topic) {
                    return Err(reject(RejectionReason::BadTopic));
                }
                Ok(())
            }
            Authentication::Token {
                keys,
                topics_by_key_id,
            } => {
                let encoded = request
                    .header(HEADER_AUTHORIZATION)
                    .and_then(strip_bearer)
                    .map(str::trim)
                    .filter(|encoded| !encoded.is_empty())
                    .ok_or_else(|| reject(RejectionReason::MissingProviderToken))?;
                let token = AuthenticationToken::parse(encoded)
                    .map_err(|_| reject(RejectionReason::InvalidProviderToken))?;

                let key = keys
                    .get(token.key_id())
                    .ok_or_else(|| reject(RejectionReason::InvalidProviderToken))?;
                if !token.verify_signature(key) {
                    return Err(reject(RejectionReason::InvalidProviderToken));
                }

                let expected_team_id = self
                    .expected_team_id
                    .get_or_insert_with(|| token.team_id().to_string());
                if expected_team_id.as_str() != token.team_id() {
                    return Err(reject(RejectionReason::InvalidProviderToken));
                }

                if token.issued_at() + Duration::hours(TOKEN_LIFETIME_HOURS) < Utc::now() {
                    return Err(reject(RejectionReason::ExpiredProviderToken));
                }

                let allowed = topics_by_key_id
                    .get(token.key_id())
                    .is_some_and(|topics| topics.contains(topic));
                if !allowed {
                    return Err(reject(RejectionReason::InvalidProviderToken));
                }

                Ok(())
            }
        }
    }
}

fn reject(reason: RejectionReason) -> HandlerError {
    HandlerError::rejected(reason)
}

fn strip_bearer(value: &str) -> Option<&str> {
    let prefix = value.get(..BEARER.len())?;
    prefix
        .eq_ignore_ascii_case(BEARER)
        .then(|| &value[BEARER.len()..])
}
