//! Shared test utilities and fixtures for Pushwire integration tests.

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

pub use pushwire_client::{AuthStrategy, ClientConfig, PushClient, TlsMode};
pub use pushwire_core::{
    CountingMetricsListener, MetricsSnapshot, PushError, PushNotification,
    PushNotificationResponse, RejectionReason, SigningKey,
};
pub use pushwire_mock::{MockGateway, MockGatewayConfig, ValidatingHandlerFactory};

pub use mocks::{
    ExpireFirstTokenHandlerFactory, FailFirstHandlerFactory, RecordingListener,
    RejectAllHandlerFactory,
};

pub use harness::{loopback_config, GatewayHarness};

pub use raw::RawGateway;

/// Upper bound for anything a test waits on
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a tracing subscriber once per test binary. `RUST_LOG` controls
/// the output.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Await `future`, failing the test if it takes longer than
/// [`DEFAULT_TIMEOUT`]
pub async fn within<F: Future>(future: F) -> F::Output {
    match tokio::time::timeout(DEFAULT_TIMEOUT, future).await {
        Ok(output) => output,
        Err(_) => panic!("timed out after {:?}", DEFAULT_TIMEOUT),
    }
}

/// Poll `condition` until it holds or [`DEFAULT_TIMEOUT`] passes
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Test fixture utilities
pub mod fixtures {
    use super::*;

    pub const TOPIC: &str = "com.example.pushwire";
    pub const TEAM_ID: &str = "TEAM000001";
    pub const KEY_ID: &str = "KEY0000001";

    /// A well-formed device token, distinct per `seed`
    pub fn device_token(seed: u8) -> String {
        hex::encode([seed; 32])
    }

    pub fn signing_key() -> SigningKey {
        SigningKey::generate(TEAM_ID, KEY_ID).expect("key generation")
    }

    pub fn notification() -> PushNotification {
        PushNotification::new(device_token(1), TOPIC, r#"{"aps":{"alert":"Hello"}}"#)
    }

    /// Validating gateway policy in certificate mode that knows the first
    /// `devices` device tokens
    pub fn certificate_policy(devices: u8) -> ValidatingHandlerFactory {
        (1..=devices).fold(ValidatingHandlerFactory::certificate(TOPIC), |factory, seed| {
            factory.with_device_token(TOPIC, device_token(seed))
        })
    }

    /// Validating gateway policy in token mode trusting `key` for [`TOPIC`]
    pub fn token_policy(key: &SigningKey) -> ValidatingHandlerFactory {
        ValidatingHandlerFactory::token()
            .with_verification_key(key.verification_key(), [TOPIC])
            .with_device_token(TOPIC, device_token(1))
    }
}
