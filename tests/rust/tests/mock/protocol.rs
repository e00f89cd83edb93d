//! Response format of the mock gateway

use bytes::Bytes;
use h2::client::SendRequest;
use http::{Method, Request, StatusCode};
use pretty_assertions::assert_eq;
use pushwire_core::wire::ErrorBody;
use pushwire_mock::{AcceptAllHandlerFactory, PushNotificationHandlerFactory};
use tests::fixtures::{self, TOPIC};
use tests::{within, GatewayHarness, RejectionReason};
use uuid::Uuid;

struct RawResponse {
    status: StatusCode,
    apns_id: Option<String>,
    unique_id: Option<String>,
    body: Bytes,
}

async fn connect(harness: &GatewayHarness) -> SendRequest<Bytes> {
    let tcp = tokio::net::TcpStream::connect(harness.gateway.local_addr())
        .await
        .unwrap();
    let (sender, connection) = h2::client::handshake(tcp).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    sender
}

async fn send(
    sender: &SendRequest<Bytes>,
    method: Method,
    path: &str,
    headers: &[(&str, &str)],
    payload: &str,
) -> RawResponse {
    let mut request = Request::builder()
        .method(method)
        .uri(format!("http://127.0.0.1{}", path));
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let request = request.body(()).unwrap();

    let mut ready = sender.clone().ready().await.unwrap();
    let (response, mut stream) = ready.send_request(request, payload.is_empty()).unwrap();
    if !payload.is_empty() {
        stream
            .send_data(Bytes::from(payload.to_string()), true)
            .unwrap();
    }

    let response = within(response).await.unwrap();
    let (parts, mut body) = response.into_parts();
    let mut collected = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.unwrap();
        let _ = body.flow_control().release_capacity(chunk.len());
        collected.extend_from_slice(&chunk);
    }

    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    RawResponse {
        status: parts.status,
        apns_id: header("apns-id"),
        unique_id: header("apns-unique-id"),
        body: Bytes::from(collected),
    }
}

fn device_path() -> String {
    format!("/3/device/{}", fixtures::device_token(1))
}

async fn start(
    factory: impl PushNotificationHandlerFactory + 'static,
) -> (GatewayHarness, SendRequest<Bytes>) {
    let harness = GatewayHarness::start(factory).await;
    let sender = connect(&harness).await;
    (harness, sender)
}

#[tokio::test]
async fn test_accepted_response_is_headers_only() {
    let (harness, sender) = start(AcceptAllHandlerFactory).await;
    let apns_id = Uuid::new_v4().to_string();

    let response = send(
        &sender,
        Method::POST,
        &device_path(),
        &[("apns-topic", TOPIC), ("apns-id", &apns_id)],
        "{}",
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.apns_id.as_deref(), Some(apns_id.as_str()));
    assert!(response.unique_id.is_some());
    assert!(response.body.is_empty());
    assert_eq!(harness.listener.accepted_count(), 1);
}

#[tokio::test]
async fn test_missing_apns_id_is_generated() {
    let (_harness, sender) = start(AcceptAllHandlerFactory).await;

    let response =
        send(&sender, Method::POST, &device_path(), &[("apns-topic", TOPIC)], "{}").await;

    let apns_id = response.apns_id.expect("apns-id header");
    assert!(Uuid::parse_str(&apns_id).is_ok());
}

#[tokio::test]
async fn test_rejection_has_json_reason() {
    let (harness, sender) = start(fixtures::certificate_policy(1)).await;

    let response = send(&sender, Method::GET, &device_path(), &[("apns-topic", TOPIC)], "").await;

    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, serde_json::json!({ "reason": "MethodNotAllowed" }));
    assert_eq!(harness.listener.rejected_count(&RejectionReason::MethodNotAllowed), 1);
}

#[tokio::test]
async fn test_malformed_apns_id_is_rejected_without_echo() {
    let (_harness, sender) = start(fixtures::certificate_policy(1)).await;

    let response = send(
        &sender,
        Method::POST,
        &device_path(),
        &[("apns-topic", TOPIC), ("apns-id", "definitely-not-a-uuid")],
        "{}",
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.apns_id, None);
    let error = ErrorBody::decode(&response.body);
    assert_eq!(error.reason.as_deref(), Some("BadMessageId"));
}

#[tokio::test]
async fn test_unregistered_timestamp_is_in_milliseconds() {
    let expired_at = chrono::DateTime::from_timestamp_millis(1_650_000_000_456).unwrap();
    let policy = fixtures::certificate_policy(1)
        .with_expired_device_token(fixtures::device_token(7), expired_at);
    let (harness, sender) = start(policy).await;

    let response = send(
        &sender,
        Method::POST,
        &format!("/3/device/{}", fixtures::device_token(7)),
        &[("apns-topic", TOPIC)],
        "{}",
    )
    .await;

    assert_eq!(response.status, StatusCode::GONE);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["reason"], "Unregistered");
    assert_eq!(body["timestamp"], 1_650_000_000_456i64);
    assert_eq!(harness.listener.last_rejection_timestamp(), Some(expired_at));
}

#[tokio::test]
async fn test_requests_on_one_connection_are_independent() {
    let (harness, sender) = start(fixtures::certificate_policy(1)).await;

    let tasks: Vec<_> = (0..25)
        .map(|i| {
            let sender = sender.clone();
            tokio::spawn(async move {
                let payload = if i % 5 == 0 { "" } else { "{}" };
                send(&sender, Method::POST, &device_path(), &[("apns-topic", TOPIC)], payload)
                    .await
                    .status
            })
        })
        .collect();

    let mut statuses = Vec::new();
    for task in tasks {
        statuses.push(within(task).await.unwrap());
    }

    assert_eq!(statuses.iter().filter(|status| **status == StatusCode::OK).count(), 20);
    assert_eq!(harness.listener.rejected_count(&RejectionReason::PayloadEmpty), 5);
}
