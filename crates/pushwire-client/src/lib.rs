//! Pushwire Client
//!
//! Delivers push notifications to the gateway over pooled, multiplexed
//! HTTP/2 connections.
//!
//! ## Architecture
//!
//! ```text
//! PushClient::send ──► ConnectionPool (coordinator task)
//!                           │  round-robin over writable connections,
//!                           │  bounded wait queue, reconnect backoff
//!                           ▼
//!                      ConnectionHandler (one task per connection)
//!                           │  auth token cache, stream writes,
//!                           │  StreamCorrelator (stream id → pending notification)
//!                           ▼
//!                      h2 connection driver ◄──► gateway
//! ```
//!
//! Each submission returns a [`PushNotificationFuture`] that resolves exactly
//! once: accepted, rejected, or failed.

pub mod client;
pub mod config;
pub mod connection;
pub mod pool;
pub mod settings;
mod time;
pub mod transport;

pub use client::PushClient;
pub use config::{AuthStrategy, BackoffConfig, ClientConfig, TlsMode};
pub use connection::PushNotificationFuture;
pub use settings::{AuthSettings, ClientSettings};
pub use transport::{BoxedIo, ClientCertificate, ConnectError, Connector, ProxyConnector};

pub use pushwire_core::{
    DeliveryPriority, MetricsListener, PushError, PushNotification, PushNotificationResponse,
    PushType, RejectionReason,
};
