//! Delivery and response interpretation

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use futures::future::join_all;
use pretty_assertions::assert_eq;
use pushwire_core::DeliveryPriority;
use pushwire_mock::{AcceptAllHandlerFactory, MockGatewayConfig};
use tests::fixtures::{self, TOPIC};
use tests::{
    within, AuthStrategy, GatewayHarness, PushNotification, RejectAllHandlerFactory,
    RejectionReason,
};
use uuid::Uuid;

#[tokio::test]
async fn test_single_notification_is_accepted() {
    let harness = GatewayHarness::start(AcceptAllHandlerFactory).await;
    let client = harness.client(AuthStrategy::None);

    let response = within(client.send(fixtures::notification())).await.unwrap();

    assert!(response.is_accepted());
    assert_eq!(response.status(), 200);
    assert!(response.apns_id().is_some());
    assert!(response.apns_unique_id().is_some());
    assert_eq!(response.rejection_reason(), None);
    assert_eq!(response.notification().topic, TOPIC);

    client.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_thousand_concurrent_notifications_share_one_connection() {
    let harness = GatewayHarness::start(AcceptAllHandlerFactory).await;
    let client = harness.client(AuthStrategy::None);

    let futures: Vec<_> = (0..1000)
        .map(|_| client.send(fixtures::notification()))
        .collect();
    let results = within(join_all(futures)).await;

    assert!(results.iter().all(|result| matches!(result, Ok(response) if response.is_accepted())));

    let metrics = harness.metrics();
    assert_eq!(metrics.sent, 1000);
    assert_eq!(metrics.accepted, 1000);
    assert_eq!(metrics.rejected, 0);
    assert_eq!(metrics.write_failures, 0);
    assert_eq!(metrics.connections_added, 1);
    assert_eq!(metrics.connections_removed, 0);
    assert_eq!(harness.listener.accepted_count(), 1000);

    client.close().await;
}

#[tokio::test]
async fn test_every_notification_rejected_with_reason() {
    let harness =
        GatewayHarness::start(RejectAllHandlerFactory::new(RejectionReason::BadDeviceToken)).await;
    let client = harness.client(AuthStrategy::None);

    let futures: Vec<_> = (0..20).map(|_| client.send(fixtures::notification())).collect();
    let results = within(join_all(futures)).await;

    for result in results {
        let response = result.unwrap();
        assert!(!response.is_accepted());
        assert_eq!(response.status(), 400);
        assert_eq!(response.rejection_reason(), Some(&RejectionReason::BadDeviceToken));
        assert_eq!(response.token_invalidation_timestamp(), None);
    }

    let metrics = harness.metrics();
    assert_eq!(metrics.sent, 20);
    assert_eq!(metrics.rejected, 20);
    assert_eq!(metrics.accepted, 0);
    // Plain rejections leave the connection alone
    assert_eq!(metrics.connections_added, 1);

    client.close().await;
}

#[tokio::test]
async fn test_unregistered_device_reports_invalidation_timestamp() {
    let expired_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
    let policy = fixtures::certificate_policy(1)
        .with_expired_device_token(fixtures::device_token(9), expired_at);
    let harness = GatewayHarness::start(policy).await;
    let client = harness.client(AuthStrategy::None);

    let notification = PushNotification::new(fixtures::device_token(9), TOPIC, "{}");
    let response = within(client.send(notification)).await.unwrap();

    assert_eq!(response.status(), 410);
    assert_eq!(response.rejection_reason(), Some(&RejectionReason::Unregistered));
    assert_eq!(response.token_invalidation_timestamp(), Some(expired_at));

    client.close().await;
}

#[tokio::test]
async fn test_optional_headers_reach_the_gateway() {
    let harness = GatewayHarness::start(fixtures::certificate_policy(1)).await;
    let client = harness.client(AuthStrategy::None);

    let apns_id = Uuid::new_v4();
    let expiration = Utc::now() + ChronoDuration::hours(1);
    let notification = fixtures::notification()
        .with_apns_id(apns_id)
        .with_collapse_id("score-update")
        .with_priority(DeliveryPriority::ConservePower)
        .with_expiration(expiration);

    let response = within(client.send(notification)).await.unwrap();
    assert!(response.is_accepted());
    assert_eq!(response.apns_id(), Some(apns_id));

    let requests = harness.listener.accepted_requests();
    let request = &requests[0];
    assert_eq!(request.path, format!("/3/device/{}", fixtures::device_token(1)));
    assert_eq!(request.header("apns-topic"), Some(TOPIC));
    assert_eq!(request.header("apns-priority"), Some("5"));
    assert_eq!(request.header("apns-collapse-id"), Some("score-update"));
    assert_eq!(
        request.header("apns-expiration"),
        Some(expiration.timestamp().to_string().as_str())
    );
    assert_eq!(request.header("authorization"), None);

    client.close().await;
}

#[tokio::test]
async fn test_gateway_rejections_follow_validation_order() {
    let harness = GatewayHarness::start(fixtures::certificate_policy(1)).await;
    let client = harness.client(AuthStrategy::None);

    let cases = [
        (
            PushNotification::new(fixtures::device_token(2), TOPIC, "{}"),
            RejectionReason::DeviceTokenNotForTopic,
        ),
        (
            PushNotification::new(fixtures::device_token(1), "com.example.other", "{}"),
            RejectionReason::DeviceTokenNotForTopic,
        ),
        (
            fixtures::notification().with_collapse_id("x".repeat(65)),
            RejectionReason::BadCollapseId,
        ),
        (
            PushNotification::new(fixtures::device_token(1), TOPIC, "x".repeat(4097)),
            RejectionReason::PayloadTooLarge,
        ),
        (
            PushNotification::new(fixtures::device_token(1), TOPIC, ""),
            RejectionReason::PayloadEmpty,
        ),
    ];

    for (notification, expected) in cases {
        let response = within(client.send(notification)).await.unwrap();
        assert_eq!(response.rejection_reason(), Some(&expected));
        assert_eq!(response.status(), expected.status_code());
    }

    client.close().await;
}

#[tokio::test]
async fn test_notifications_spread_over_configured_connections() {
    let harness = GatewayHarness::start(AcceptAllHandlerFactory).await;
    let mut config = harness.client_config(AuthStrategy::None);
    config.concurrent_connections = 4;
    let client = harness.client_with(config);

    let metrics = harness.metrics.clone();
    assert!(tests::wait_until(|| metrics.snapshot().connections_added == 4).await);

    let futures: Vec<_> = (0..100).map(|_| client.send(fixtures::notification())).collect();
    let results = within(join_all(futures)).await;
    assert!(results.iter().all(Result::is_ok));

    assert_eq!(harness.metrics().connections_added, 4);
    client.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gateway_stream_limit_is_respected() {
    let config = MockGatewayConfig::new(AcceptAllHandlerFactory).with_max_concurrent_streams(2);
    let harness = GatewayHarness::start_with(config).await;
    let client = harness.client(AuthStrategy::None);

    let futures: Vec<_> = (0..200).map(|_| client.send(fixtures::notification())).collect();
    let results = within(join_all(futures)).await;

    assert!(results.iter().all(|result| matches!(result, Ok(response) if response.is_accepted())));
    assert_eq!(harness.metrics().accepted, 200);

    client.close().await;
}
