//! TLS and proxied transports

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use pushwire_client::transport::certificates_from_pem;
use pushwire_client::{BoxedIo, ProxyConnector};
use pushwire_mock::{tls, AcceptAllHandlerFactory, MockGatewayConfig};
use tests::fixtures;
use tests::{within, AuthStrategy, GatewayHarness, TlsMode};

struct SelfSigned {
    certificate_pem: String,
    private_key_pem: String,
}

fn self_signed_localhost() -> SelfSigned {
    let certificate = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    SelfSigned {
        certificate_pem: certificate.serialize_pem().unwrap(),
        private_key_pem: certificate.serialize_private_key_pem(),
    }
}

async fn tls_harness(certificate: &SelfSigned) -> GatewayHarness {
    let server_tls = tls::server_config(
        certificate.certificate_pem.as_bytes(),
        certificate.private_key_pem.as_bytes(),
        None,
    )
    .unwrap();
    GatewayHarness::start_with(MockGatewayConfig::new(AcceptAllHandlerFactory).with_tls(server_tls))
        .await
}

#[tokio::test]
async fn test_tls_with_trusted_certificate() {
    let certificate = self_signed_localhost();
    let harness = tls_harness(&certificate).await;

    let mut config = harness.client_config(AuthStrategy::None);
    config.host = "localhost".to_string();
    config.tls = TlsMode::TrustedCertificates(
        certificates_from_pem(certificate.certificate_pem.as_bytes()).unwrap(),
    );
    let client = harness.client_with(config);

    let response = within(client.send(fixtures::notification())).await.unwrap();
    assert!(response.is_accepted());

    client.close().await;
}

#[tokio::test]
async fn test_tls_rejects_untrusted_certificate() {
    let certificate = self_signed_localhost();
    let harness = tls_harness(&certificate).await;

    let mut config = harness.client_config(AuthStrategy::None);
    config.host = "localhost".to_string();
    config.tls = TlsMode::WebPki;
    let client = harness.client_with(config);

    let error = within(client.send(fixtures::notification())).await.unwrap_err();
    assert!(
        matches!(error, tests::PushError::ConnectionFailed(_)),
        "got {:?}",
        error
    );
    assert_eq!(harness.listener.accepted_count(), 0);

    client.close().await;
}

/// Connects directly but counts how often it was asked to
struct CountingProxy {
    target: std::net::SocketAddr,
    connections: AtomicUsize,
}

#[async_trait::async_trait]
impl ProxyConnector for CountingProxy {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<BoxedIo> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let stream = tokio::net::TcpStream::connect(self.target).await?;
        Ok(Box::new(stream))
    }

    fn description(&self) -> String {
        format!("test proxy to {}", self.target)
    }
}

#[tokio::test]
async fn test_proxy_supplies_the_connection() {
    let harness = GatewayHarness::start(AcceptAllHandlerFactory).await;
    let proxy = Arc::new(CountingProxy {
        target: harness.gateway.local_addr(),
        connections: AtomicUsize::new(0),
    });

    // The host is never resolved; the proxy decides where to connect
    let mut config = harness.client_config(AuthStrategy::None);
    config.host = "gateway.invalid".to_string();
    config.proxy = Some(proxy.clone());
    let client = harness.client_with(config);

    let response = within(client.send(fixtures::notification())).await.unwrap();
    assert!(response.is_accepted());
    assert_eq!(proxy.connections.load(Ordering::SeqCst), 1);

    client.close().await;
}
