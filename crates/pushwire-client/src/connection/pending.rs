//! Pending notifications and the futures callers wait on
//!
//! A [`PendingNotification`] travels from the client through the pool to a
//! connection and, if it is written, into that connection's stream
//! correlator. Resolving it consumes it, so a notification can only ever be
//! resolved once. Dropping one unresolved fails its future, so nothing is
//! left hanging when a task or connection goes away.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use pushwire_core::{MetricsListener, PushError, PushNotification, PushNotificationResponse};
use tokio::sync::oneshot;

pub(crate) type PushResult = Result<PushNotificationResponse, PushError>;

pub(crate) struct PendingNotification {
    id: u64,
    notification: Arc<PushNotification>,
    responder: Option<oneshot::Sender<PushResult>>,
    metrics: Arc<dyn MetricsListener>,
    sent_reported: bool,
    expired_token_retried: bool,
    refused_stream_retried: bool,
}

impl PendingNotification {
    pub(crate) fn new(
        id: u64,
        notification: Arc<PushNotification>,
        metrics: Arc<dyn MetricsListener>,
    ) -> (Self, PushNotificationFuture) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            id,
            notification,
            responder: Some(tx),
            metrics,
            sent_reported: false,
            expired_token_retried: false,
            refused_stream_retried: false,
        };
        (pending, PushNotificationFuture::waiting(rx))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn notification(&self) -> &Arc<PushNotification> {
        &self.notification
    }

    /// Record that the notification reached the wire. Only the first write
    /// counts; a resend after an expired token or refused stream does not.
    pub(crate) fn mark_sent(&mut self) {
        if !self.sent_reported {
            self.sent_reported = true;
            self.metrics.handle_notification_sent(self.id);
        }
    }

    /// Claim the one resend allowed after an `ExpiredProviderToken` rejection
    pub(crate) fn try_claim_expired_token_retry(&mut self) -> bool {
        !std::mem::replace(&mut self.expired_token_retried, true)
    }

    /// Claim the one same-connection rewrite allowed after `REFUSED_STREAM`
    pub(crate) fn try_claim_refused_stream_retry(&mut self) -> bool {
        !std::mem::replace(&mut self.refused_stream_retried, true)
    }

    /// Resolve with the gateway's verdict or a failure
    pub(crate) fn complete(mut self, result: PushResult) {
        self.resolve(result);
    }

    pub(crate) fn fail(self, error: PushError) {
        self.complete(Err(error));
    }

    fn resolve(&mut self, result: PushResult) {
        let Some(responder) = self.responder.take() else {
            return;
        };

        match &result {
            Ok(response) if response.is_accepted() => {
                self.metrics.handle_notification_accepted(self.id)
            }
            Ok(_) => self.metrics.handle_notification_rejected(self.id),
            Err(_) => self.metrics.handle_write_failure(self.id),
        }

        // The caller may have stopped waiting
        let _ = responder.send(result);
    }
}

impl Drop for PendingNotification {
    fn drop(&mut self) {
        if self.responder.is_some() {
            self.resolve(Err(PushError::StreamClosedBeforeReply));
        }
    }
}

/// Future returned by [`crate::PushClient::send`]
pub struct PushNotificationFuture {
    state: FutureState,
}

enum FutureState {
    Waiting(oneshot::Receiver<PushResult>),
    Ready(Option<PushResult>),
}

impl PushNotificationFuture {
    fn waiting(rx: oneshot::Receiver<PushResult>) -> Self {
        Self {
            state: FutureState::Waiting(rx),
        }
    }

    /// A future that is already resolved with `error`
    pub(crate) fn failed(error: PushError) -> Self {
        Self {
            state: FutureState::Ready(Some(Err(error))),
        }
    }
}

impl Future for PushNotificationFuture {
    type Output = Result<PushNotificationResponse, PushError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            FutureState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(PushError::StreamClosedBeforeReply))),
            FutureState::Ready(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or(Err(PushError::StreamClosedBeforeReply)),
            ),
        }
    }
}
