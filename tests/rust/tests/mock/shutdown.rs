//! Mock gateway shutdown

use std::time::Duration;

use pushwire_mock::AcceptAllHandlerFactory;
use tests::{within, GatewayHarness};

#[tokio::test]
async fn test_shutdown_closes_connections_and_stops_listening() {
    let harness = GatewayHarness::start(AcceptAllHandlerFactory).await;
    let addr = harness.gateway.local_addr();

    let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (_sender, connection) = h2::client::handshake(tcp).await.unwrap();
    let connection = tokio::spawn(connection);

    within(harness.gateway.shutdown()).await;

    // GOAWAY ends the client side of the connection
    assert!(within(connection).await.is_ok());

    let refused = tokio::time::timeout(
        Duration::from_secs(1),
        tokio::net::TcpStream::connect(addr),
    )
    .await;
    assert!(matches!(refused, Ok(Err(_))));
}
