//! Domain entities for push delivery

mod notification;
mod rejection;
mod response;

pub use notification::{sanitize_device_token, DeliveryPriority, PushNotification, PushType};
pub use rejection::RejectionReason;
pub use response::PushNotificationResponse;
