//! Closing the client

use futures::future::join_all;
use pretty_assertions::assert_eq;
use pushwire_mock::AcceptAllHandlerFactory;
use tests::fixtures;
use tests::{within, AuthStrategy, GatewayHarness, PushError};

#[tokio::test]
async fn test_send_after_close_fails_with_client_closed() {
    let harness = GatewayHarness::start(AcceptAllHandlerFactory).await;
    let client = harness.client(AuthStrategy::None);

    within(client.send(fixtures::notification())).await.unwrap();
    within(client.close()).await;
    assert!(client.is_closed());

    let error = within(client.send(fixtures::notification())).await.unwrap_err();
    assert_eq!(error, PushError::ClientClosed);
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn test_close_is_idempotent_and_releases_connections() {
    let harness = GatewayHarness::start(AcceptAllHandlerFactory).await;
    let mut config = harness.client_config(AuthStrategy::None);
    config.concurrent_connections = 3;
    let client = harness.client_with(config);

    let metrics = harness.metrics.clone();
    assert!(tests::wait_until(|| metrics.snapshot().connections_added == 3).await);

    within(client.close()).await;
    within(client.close()).await;

    let snapshot = harness.metrics();
    assert_eq!(snapshot.connections_added, 3);
    assert_eq!(snapshot.connections_removed, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_resolves_every_outstanding_notification() {
    let harness = GatewayHarness::start(AcceptAllHandlerFactory).await;
    let client = harness.client(AuthStrategy::None);

    let futures: Vec<_> = (0..200).map(|_| client.send(fixtures::notification())).collect();
    within(client.close()).await;

    // Whatever was in flight either completed or failed; nothing hangs
    let results = within(join_all(futures)).await;
    let accepted = results.iter().filter(|result| result.is_ok()).count() as u64;

    let snapshot = harness.metrics();
    assert_eq!(snapshot.accepted, accepted);
    assert_eq!(snapshot.completed(), 200);
}

#[tokio::test]
async fn test_dropping_client_closes_connections() {
    let harness = GatewayHarness::start(AcceptAllHandlerFactory).await;
    let client = harness.client(AuthStrategy::None);
    within(client.send(fixtures::notification())).await.unwrap();

    drop(client);

    let metrics = harness.metrics.clone();
    assert!(tests::wait_until(|| metrics.snapshot().connections_removed == 1).await);
}
