//! Pushwire Mock Gateway
//!
//! An HTTP/2 push gateway for tests. Each accepted connection gets its own
//! [`PushNotificationHandler`] from the configured factory, which decides
//! whether a notification is accepted or rejected; the server turns that
//! decision into the gateway's response format.

pub mod handler;
pub mod listener;
pub mod server;
pub mod tls;

pub use handler::{
    AcceptAllHandlerFactory, HandlerError, NotificationRequest, PushNotificationHandler,
    PushNotificationHandlerFactory, ValidatingHandlerFactory,
};
pub use listener::MockGatewayListener;
pub use server::{MockGateway, MockGatewayConfig};
