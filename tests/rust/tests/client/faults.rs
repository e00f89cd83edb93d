//! Gateway misbehaviour the mock never produces: refused streams, GOAWAY
//! with a fixed last stream id, unanswered pings, shutdown rejections and
//! connections dropped mid-flight

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use h2::server::SendResponse;
use h2::{Reason, RecvStream};
use http::{Request, Response, StatusCode};
use pretty_assertions::assert_eq;
use pushwire_core::wire::ErrorBody;
use tests::raw::{frames, serve_silently};
use tests::{
    fixtures, loopback_config, wait_until, within, AuthStrategy, CountingMetricsListener,
    PushClient, PushError, RawGateway, RejectionReason,
};
use tokio::net::TcpStream;

type Exchange = (Request<RecvStream>, SendResponse<Bytes>);

async fn handshake(tcp: TcpStream) -> Option<h2::server::Connection<TcpStream, Bytes>> {
    h2::server::handshake(tcp).await.ok()
}

/// Read the request body, then reply with `status` and an optional body
fn answer((request, mut respond): Exchange, status: StatusCode, body: Option<Vec<u8>>) {
    tokio::spawn(async move {
        let mut request_body = request.into_body();
        while let Some(Ok(chunk)) = request_body.data().await {
            let _ = request_body.flow_control().release_capacity(chunk.len());
        }

        let response = Response::builder().status(status).body(()).unwrap();
        match body {
            None => {
                let _ = respond.send_response(response, true);
            }
            Some(body) => {
                if let Ok(mut stream) = respond.send_response(response, false) {
                    let _ = stream.send_data(Bytes::from(body), true);
                }
            }
        }
    });
}

fn client_for(gateway: &RawGateway, metrics: &Arc<CountingMetricsListener>) -> PushClient {
    let config = loopback_config(gateway.port(), AuthStrategy::None, metrics.clone());
    PushClient::new(config).unwrap()
}

#[tokio::test]
async fn test_refused_stream_is_rewritten_on_same_connection() {
    let requests = Arc::new(AtomicUsize::new(0));
    let seen = requests.clone();
    let gateway = RawGateway::start(move |_, tcp| {
        let seen = seen.clone();
        async move {
            let Some(mut connection) = handshake(tcp).await else {
                return;
            };
            while let Some(Ok((request, mut respond))) = connection.accept().await {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    respond.send_reset(Reason::REFUSED_STREAM);
                } else {
                    answer((request, respond), StatusCode::OK, None);
                }
            }
        }
    })
    .await;
    let metrics = Arc::new(CountingMetricsListener::new());
    let client = client_for(&gateway, &metrics);

    let response = within(client.send(fixtures::notification())).await.unwrap();

    assert!(response.is_accepted());
    assert_eq!(requests.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.connections(), 1);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.sent, 1);
    assert_eq!(snapshot.accepted, 1);
    assert_eq!(snapshot.write_failures, 0);
    assert_eq!(snapshot.connections_added, 1);

    client.close().await;
}

#[tokio::test]
async fn test_streams_above_go_away_last_stream_id_are_not_processed() {
    let gateway = RawGateway::start(|index, mut tcp| async move {
        if index > 0 {
            return serve_silently(tcp).await;
        }
        let Ok(streams) = frames::collect_requests(&mut tcp, |streams| streams.len() == 3).await
        else {
            return;
        };

        // Answer the first stream, then refuse everything after it
        let first = streams[0];
        let flags = frames::END_STREAM | frames::END_HEADERS;
        if frames::write_frame(&mut tcp, frames::HEADERS, flags, first, frames::STATUS_200)
            .await
            .is_err()
        {
            return;
        }
        if frames::write_go_away(&mut tcp, first).await.is_err() {
            return;
        }
        serve_silently(tcp).await;
    })
    .await;
    let metrics = Arc::new(CountingMetricsListener::new());
    let client = client_for(&gateway, &metrics);

    let pending: Vec<_> = (0..3).map(|_| client.send(fixtures::notification())).collect();
    let results = within(join_all(pending)).await;

    assert!(results[0].as_ref().unwrap().is_accepted());
    for result in &results[1..] {
        assert_eq!(result.as_ref().unwrap_err(), &PushError::NotProcessed);
    }
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.sent, 3);
    assert_eq!(snapshot.accepted, 1);
    assert_eq!(snapshot.write_failures, 2);
    assert_eq!(snapshot.completed(), snapshot.sent);

    client.close().await;
}

#[tokio::test]
async fn test_drain_deadline_fails_unanswered_streams() {
    let requests = Arc::new(AtomicUsize::new(0));
    let seen = requests.clone();
    let gateway = RawGateway::start(move |_, tcp| {
        let seen = seen.clone();
        async move {
            let Some(mut connection) = handshake(tcp).await else {
                return;
            };
            // Keep the connection alive but never reply
            let mut held = Vec::new();
            while let Some(Ok(exchange)) = connection.accept().await {
                seen.fetch_add(1, Ordering::SeqCst);
                held.push(exchange);
            }
        }
    })
    .await;
    let metrics = Arc::new(CountingMetricsListener::new());
    let mut config = loopback_config(gateway.port(), AuthStrategy::None, metrics.clone());
    config.graceful_shutdown_timeout = Duration::from_millis(300);
    let client = PushClient::new(config).unwrap();

    let pending: Vec<_> = (0..2).map(|_| client.send(fixtures::notification())).collect();
    assert!(wait_until(|| requests.load(Ordering::SeqCst) == 2).await);

    let started = Instant::now();
    within(client.close()).await;
    assert!(started.elapsed() >= Duration::from_millis(250));

    for result in within(join_all(pending)).await {
        assert_eq!(result.unwrap_err(), PushError::StreamClosedBeforeReply);
    }
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.sent, 2);
    assert_eq!(snapshot.write_failures, 2);
    assert_eq!(snapshot.completed(), snapshot.sent);
}

#[tokio::test]
async fn test_unanswered_ping_replaces_connection() {
    let gateway = RawGateway::start(|_, tcp| serve_silently(tcp)).await;
    let metrics = Arc::new(CountingMetricsListener::new());
    let mut config = loopback_config(gateway.port(), AuthStrategy::None, metrics.clone());
    config.idle_ping_interval = Duration::from_millis(100);
    let client = PushClient::new(config).unwrap();

    assert!(wait_until(|| metrics.snapshot().connections_removed >= 1).await);
    assert!(wait_until(|| gateway.connections() >= 2).await);

    client.close().await;
}

async fn assert_rejection_drains_connection(reason: RejectionReason) {
    let body = ErrorBody::encode(&reason, None);
    let gateway = RawGateway::start(move |index, tcp| {
        let body = body.clone();
        async move {
            let Some(mut connection) = handshake(tcp).await else {
                return;
            };
            while let Some(Ok(exchange)) = connection.accept().await {
                if index == 0 {
                    answer(exchange, StatusCode::SERVICE_UNAVAILABLE, Some(body.clone()));
                } else {
                    answer(exchange, StatusCode::OK, None);
                }
            }
        }
    })
    .await;
    let metrics = Arc::new(CountingMetricsListener::new());
    let client = client_for(&gateway, &metrics);

    let rejected = within(client.send(fixtures::notification())).await.unwrap();
    assert!(!rejected.is_accepted());
    assert_eq!(rejected.status(), 503);
    assert_eq!(rejected.rejection_reason(), Some(&reason));

    assert!(wait_until(|| metrics.snapshot().connections_removed == 1).await);

    let accepted = within(client.send(fixtures::notification())).await.unwrap();
    assert!(accepted.is_accepted());
    assert_eq!(gateway.connections(), 2);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.rejected, 1);
    assert_eq!(snapshot.accepted, 1);

    client.close().await;
}

#[tokio::test]
async fn test_shutdown_rejection_drains_connection() {
    assert_rejection_drains_connection(RejectionReason::Shutdown).await;
}

#[tokio::test]
async fn test_service_unavailable_rejection_drains_connection() {
    assert_rejection_drains_connection(RejectionReason::ServiceUnavailable).await;
}

#[tokio::test]
async fn test_dropped_connection_fails_in_flight_notifications() {
    let gateway = RawGateway::start(|index, tcp| async move {
        let Some(mut connection) = handshake(tcp).await else {
            return;
        };

        if index == 0 {
            let mut held = Vec::new();
            while held.len() < 3 {
                match connection.accept().await {
                    Some(Ok(exchange)) => held.push(exchange),
                    _ => return,
                }
            }
            // Close the socket with no GOAWAY and no replies
            drop(connection);
            drop(held);
            return;
        }

        while let Some(Ok(exchange)) = connection.accept().await {
            answer(exchange, StatusCode::OK, None);
        }
    })
    .await;
    let metrics = Arc::new(CountingMetricsListener::new());
    let client = client_for(&gateway, &metrics);

    let pending: Vec<_> = (0..3).map(|_| client.send(fixtures::notification())).collect();
    for result in within(join_all(pending)).await {
        assert_eq!(result.unwrap_err(), PushError::StreamClosedBeforeReply);
    }
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.sent, 3);
    assert_eq!(snapshot.write_failures, 3);
    assert_eq!(snapshot.completed(), snapshot.sent);

    // The replacement connection delivers
    let response = within(client.send(fixtures::notification())).await.unwrap();
    assert!(response.is_accepted());
    assert_eq!(gateway.connections(), 2);

    client.close().await;
}
