//! Notification requests and response interpretation

use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri};
use pushwire_core::wire::{self, ErrorBody};
use pushwire_core::{PushNotification, RejectionReason};
use uuid::Uuid;

/// Build the request headers for a notification; the payload follows as the body
pub(crate) fn build_request(
    scheme: &str,
    authority: &str,
    notification: &PushNotification,
    authorization: Option<HeaderValue>,
) -> Result<Request<()>, http::Error> {
    let uri = Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(wire::device_path(&notification.token))
        .build()?;

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(wire::HEADER_TOPIC, notification.topic.as_str())
        .header(wire::HEADER_PRIORITY, notification.priority.code().to_string())
        .header(
            wire::HEADER_EXPIRATION,
            wire::expiration_header_value(notification.expiration),
        );

    if let Some(push_type) = notification.push_type {
        builder = builder.header(wire::HEADER_PUSH_TYPE, push_type.as_str());
    }
    if let Some(collapse_id) = &notification.collapse_id {
        builder = builder.header(wire::HEADER_COLLAPSE_ID, collapse_id.as_str());
    }
    if let Some(apns_id) = notification.apns_id {
        builder = builder.header(wire::HEADER_APNS_ID, apns_id.to_string());
    }
    if let Some(authorization) = authorization {
        builder = builder.header(wire::HEADER_AUTHORIZATION, authorization);
    }

    builder.body(())
}

/// What a completed stream means for its notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamOutcome {
    Accepted {
        status: u16,
        apns_id: Option<Uuid>,
        apns_unique_id: Option<Uuid>,
    },
    Rejected {
        status: u16,
        apns_id: Option<Uuid>,
        reason: Option<RejectionReason>,
        timestamp: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// A server error without a recognized reason; the gateway may be in a
    /// bad state, so the connection that carried it is replaced.
    InternalError { status: u16, reason: Option<String> },
}

pub(crate) fn interpret_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) -> StreamOutcome {
    let apns_id = uuid_header(headers, wire::HEADER_APNS_ID);

    if status.is_success() {
        return StreamOutcome::Accepted {
            status: status.as_u16(),
            apns_id,
            apns_unique_id: uuid_header(headers, wire::HEADER_UNIQUE_ID),
        };
    }

    let error = ErrorBody::decode(body);
    let reason = error.reason.as_deref().map(RejectionReason::parse);

    if status.is_server_error() {
        match reason {
            None
            | Some(RejectionReason::InternalServerError)
            | Some(RejectionReason::Other(_)) => {
                return StreamOutcome::InternalError {
                    status: status.as_u16(),
                    reason: error.reason,
                };
            }
            Some(_) => {}
        }
    }

    StreamOutcome::Rejected {
        status: status.as_u16(),
        apns_id,
        reason,
        timestamp: error.timestamp,
    }
}

fn uuid_header(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
}
