use super::{
    HandlerError, NotificationRequest, PushNotificationHandler, PushNotificationHandlerFactory,
};

/// Accepts every notification without looking at it
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllHandlerFactory;

struct AcceptAllHandler;

impl PushNotificationHandler for AcceptAllHandler {
    fn handle_notification(&mut self, _request: &NotificationRequest) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl PushNotificationHandlerFactory for AcceptAllHandlerFactory {
    fn build_handler(&self) -> Box<dyn PushNotificationHandler> {
        Box::new(AcceptAllHandler)
    }
}
