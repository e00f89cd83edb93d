//! Connection handler
//!
//! Owns one HTTP/2 connection. Notifications arrive from the pool on a
//! channel and are written as streams once the connection has capacity;
//! responses are matched back to notifications through the
//! [`StreamCorrelator`]. The h2 connection itself is driven by a separate
//! task so that a slow response never stalls writes.

use std::collections::VecDeque;
use std::future::{self, poll_fn};
use std::sync::Arc;
use std::task::Poll;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use h2::client::{ResponseFuture, SendRequest};
use h2::Reason;
use pushwire_core::{PushError, PushNotificationResponse, RejectionReason};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::correlator::{StreamCorrelator, StreamIdReused};
use super::keepalive::{keep_alive, Activity};
use super::pending::PendingNotification;
use super::request::{self, StreamOutcome};
use super::token::TokenCache;
use super::HandlerSettings;
use crate::pool::PoolEvent;
use crate::time::sleep_until_opt;
use crate::transport::{BoxedIo, ConnectError};

type StreamResult = Result<(http::response::Parts, Bytes), h2::Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerState {
    Connected,
    Draining { deadline: Instant },
    Closed,
}

/// The pool's side of a connection
pub(crate) struct ConnectionHandle {
    pub(crate) name: String,
    sender: mpsc::UnboundedSender<PendingNotification>,
}

impl ConnectionHandle {
    /// Queue a notification for writing. Hands it back if the connection
    /// has stopped taking work.
    pub(crate) fn send(&self, pending: PendingNotification) -> Result<(), PendingNotification> {
        self.sender.send(pending).map_err(|e| e.0)
    }
}

pub(crate) struct ConnectionHandler {
    id: u64,
    name: String,
    settings: Arc<HandlerSettings>,
    state: HandlerState,
    send_request: Option<SendRequest<Bytes>>,
    /// `poll_ready` has returned ready since the last write
    ready: bool,
    /// The pool has been told this connection is at its stream limit
    blocked: bool,
    commands: mpsc::UnboundedReceiver<PendingNotification>,
    events: mpsc::UnboundedSender<PoolEvent>,
    shutdown: watch::Receiver<Option<Instant>>,
    correlator: StreamCorrelator,
    in_flight: FuturesUnordered<BoxFuture<'static, (u32, StreamResult)>>,
    retry_queue: VecDeque<PendingNotification>,
    token: Option<TokenCache>,
    activity: Arc<Activity>,
    driver: JoinHandle<()>,
    driver_done: Option<oneshot::Receiver<Option<h2::Error>>>,
    keepalive: Option<JoinHandle<()>>,
    ping_failed: Option<oneshot::Receiver<String>>,
}

impl ConnectionHandler {
    /// Run the HTTP/2 handshake over `io` and set up the connection's tasks
    pub(crate) async fn establish(
        id: u64,
        io: BoxedIo,
        settings: Arc<HandlerSettings>,
        events: mpsc::UnboundedSender<PoolEvent>,
        shutdown: watch::Receiver<Option<Instant>>,
    ) -> Result<(ConnectionHandle, ConnectionHandler), ConnectError> {
        let name = format!("connection-{}", id);
        debug!(connection = %name, "[ConnectionHandler] HTTP/2 handshake");

        let (send_request, mut connection) = h2::client::Builder::new()
            .enable_push(false)
            .handshake::<_, Bytes>(io)
            .await?;

        let ping_pong = connection.ping_pong();
        let (driver_tx, driver_rx) = oneshot::channel();
        let driver = tokio::spawn(async move {
            let result = connection.await;
            let _ = driver_tx.send(result.err());
        });

        let activity = Arc::new(Activity::new());
        let (keepalive, ping_failed) = match ping_pong {
            Some(ping_pong) => {
                let (failed_tx, failed_rx) = oneshot::channel();
                let task = tokio::spawn(keep_alive(
                    name.clone(),
                    ping_pong,
                    settings.idle_ping_interval,
                    activity.clone(),
                    failed_tx,
                ));
                (Some(task), Some(failed_rx))
            }
            None => (None, None),
        };

        let token = settings
            .signing_key
            .as_ref()
            .map(|key| TokenCache::new(key.clone(), settings.token_expiration));

        let (sender, commands) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            name: name.clone(),
            sender,
        };
        let handler = ConnectionHandler {
            id,
            name,
            settings,
            state: HandlerState::Connected,
            send_request: Some(send_request),
            ready: false,
            blocked: false,
            commands,
            events,
            shutdown,
            correlator: StreamCorrelator::new(),
            in_flight: FuturesUnordered::new(),
            retry_queue: VecDeque::new(),
            token,
            activity,
            driver,
            driver_done: Some(driver_rx),
            keepalive,
            ping_failed,
        };

        Ok((handle, handler))
    }

    /// Serve the connection until it has drained and closed
    pub(crate) async fn run(mut self) {
        info!(connection = %self.name, "[ConnectionHandler] Connected");

        let shutdown_deadline = *self.shutdown.borrow_and_update();
        if let Some(deadline) = shutdown_deadline {
            self.drain_until("client is closing", deadline);
        }

        loop {
            match self.state {
                HandlerState::Closed => break,
                HandlerState::Draining { .. } if self.in_flight.is_empty() => break,
                _ => {}
            }

            if self.accepting() && !self.ready {
                self.poll_ready_now().await;
            }
            if self.ready && self.accepting() {
                if let Some(pending) = self.retry_queue.pop_front() {
                    self.write(pending);
                    continue;
                }
            }

            let drain_deadline = match self.state {
                HandlerState::Draining { deadline } => Some(deadline),
                _ => None,
            };
            let token_deadline = self.token.as_ref().and_then(TokenCache::expires_at);
            let accepting = self.accepting();
            let ready = self.ready;

            tokio::select! {
                biased;

                Some((stream_id, result)) = self.in_flight.next(),
                    if !self.in_flight.is_empty() =>
                {
                    self.handle_stream_result(stream_id, result);
                }

                result = wait_ready(self.send_request.as_mut()), if accepting && !ready => {
                    self.on_ready(result);
                }

                command = self.commands.recv(), if accepting && ready => match command {
                    Some(pending) => self.write(pending),
                    None => self.begin_draining("pool stopped"),
                },

                ended = recv_opt(&mut self.driver_done) => {
                    self.driver_done = None;
                    let reason = match ended {
                        Ok(Some(e)) => format!("connection error: {}", e),
                        _ => "connection closed".to_string(),
                    };
                    self.begin_draining(&reason);
                }

                failure = recv_opt(&mut self.ping_failed) => {
                    self.ping_failed = None;
                    if let Ok(reason) = failure {
                        warn!(connection = %self.name, "[ConnectionHandler] Keep-alive {}", reason);
                        self.begin_draining(&reason);
                    }
                }

                changed = self.shutdown.changed(), if accepting => {
                    let deadline = match changed {
                        Ok(()) => *self.shutdown.borrow_and_update(),
                        Err(_) => Some(Instant::now() + self.settings.graceful_shutdown_timeout),
                    };
                    if let Some(deadline) = deadline {
                        self.drain_until("client is closing", deadline);
                    }
                }

                _ = sleep_until_opt(token_deadline) => {
                    if let Some(token) = self.token.as_mut() {
                        token.invalidate();
                        debug!(
                            connection = %self.name,
                            "[ConnectionHandler] Authentication token expired"
                        );
                    }
                }

                _ = sleep_until_opt(drain_deadline) => {
                    warn!(
                        connection = %self.name,
                        in_flight = self.correlator.len(),
                        "[ConnectionHandler] Drain deadline reached, closing"
                    );
                    break;
                }
            }
        }

        self.finish();
    }

    fn accepting(&self) -> bool {
        self.state == HandlerState::Connected && self.send_request.is_some()
    }

    /// Poll stream capacity once so the pool learns right away when this
    /// connection hits its concurrent stream limit
    async fn poll_ready_now(&mut self) {
        let Some(sender) = self.send_request.as_mut() else {
            return;
        };
        let polled = poll_fn(|cx| Poll::Ready(sender.poll_ready(cx))).await;

        match polled {
            Poll::Ready(result) => self.on_ready(result),
            Poll::Pending if !self.blocked => {
                self.blocked = true;
                debug!(connection = %self.name, "[ConnectionHandler] Stream limit reached");
                let _ = self.events.send(PoolEvent::WritabilityChanged {
                    id: self.id,
                    writable: false,
                });
            }
            Poll::Pending => {}
        }
    }

    fn on_ready(&mut self, result: Result<(), h2::Error>) {
        match result {
            Ok(()) => {
                self.ready = true;
                if self.blocked {
                    self.blocked = false;
                    let _ = self.events.send(PoolEvent::WritabilityChanged {
                        id: self.id,
                        writable: true,
                    });
                }
            }
            Err(e) => self.begin_draining(&format!("connection no longer accepts streams: {}", e)),
        }
    }

    /// Write one notification as a stream. A notification that cannot be
    /// written is failed here and never registered, so it can't also be
    /// resolved by a later response.
    fn write(&mut self, mut pending: PendingNotification) {
        self.ready = false;

        let authorization = match self
            .token
            .as_mut()
            .map(TokenCache::authorization_header)
            .transpose()
        {
            Ok(authorization) => authorization,
            Err(e) => {
                error!(connection = %self.name, "[ConnectionHandler] Failed to mint token: {}", e);
                pending.fail(PushError::WriteFailed(e.to_string()));
                return;
            }
        };

        let request = match request::build_request(
            self.settings.scheme,
            &self.settings.authority,
            pending.notification(),
            authorization,
        ) {
            Ok(request) => request,
            Err(e) => {
                pending.fail(PushError::WriteFailed(format!("invalid request: {}", e)));
                return;
            }
        };
        let payload = Bytes::copy_from_slice(pending.notification().payload.as_bytes());

        let Some(sender) = self.send_request.as_mut() else {
            self.resubmit(pending);
            return;
        };

        let (response, mut body) = match sender.send_request(request, false) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    connection = %self.name,
                    notification_id = pending.id(),
                    "[ConnectionHandler] Write failed: {}",
                    e
                );
                pending.fail(PushError::WriteFailed(e.to_string()));
                self.begin_draining(&format!("write failed: {}", e));
                return;
            }
        };

        let stream_id = response.stream_id().as_u32();
        if let Err(e) = body.send_data(payload, true) {
            warn!(
                connection = %self.name,
                stream_id,
                "[ConnectionHandler] Payload write failed: {}",
                e
            );
            pending.fail(PushError::WriteFailed(e.to_string()));
            return;
        }

        pending.mark_sent();
        self.activity.touch();

        match self.correlator.register(stream_id, pending) {
            Ok(()) => self.in_flight.push(read_response(stream_id, response)),
            Err(StreamIdReused { stream_id, pending }) => {
                error!(connection = %self.name, stream_id, "[ConnectionHandler] Stream id reused");
                pending.fail(PushError::WriteFailed(format!(
                    "stream id {} already in use",
                    stream_id
                )));
            }
        }
    }

    fn handle_stream_result(&mut self, stream_id: u32, result: StreamResult) {
        self.activity.touch();

        let (parts, body) = match result {
            Ok(response) => response,
            Err(e) => return self.handle_stream_error(stream_id, e),
        };

        match request::interpret_response(parts.status, &parts.headers, &body) {
            StreamOutcome::Accepted {
                status,
                apns_id,
                apns_unique_id,
            } => {
                self.correlator
                    .resolve_accepted(stream_id, status, apns_id, apns_unique_id);
            }
            StreamOutcome::Rejected {
                status,
                apns_id,
                reason: Some(RejectionReason::ExpiredProviderToken),
                timestamp,
            } => self.handle_expired_token(stream_id, status, apns_id, timestamp),
            StreamOutcome::Rejected {
                status,
                apns_id,
                reason,
                timestamp,
            } => {
                let closes_connection = reason
                    .as_ref()
                    .is_some_and(RejectionReason::closes_connection);
                debug!(
                    connection = %self.name,
                    stream_id,
                    status,
                    reason = ?reason,
                    "[ConnectionHandler] Notification rejected"
                );
                self.correlator
                    .resolve_rejected(stream_id, status, apns_id, reason, timestamp);
                if closes_connection {
                    self.begin_draining("gateway is shutting down or unavailable");
                }
            }
            StreamOutcome::InternalError { status, reason } => {
                warn!(
                    connection = %self.name,
                    stream_id,
                    status,
                    "[ConnectionHandler] Gateway internal error, replacing connection"
                );
                self.correlator
                    .fail(stream_id, PushError::InternalServerError { status, reason });
                self.begin_draining("gateway reported an internal error");
            }
        }
    }

    /// The gateway wedges a connection after it decides the token is
    /// expired, so the token is dropped and the connection closed. The
    /// notification is resent once on another connection when configured.
    fn handle_expired_token(
        &mut self,
        stream_id: u32,
        status: u16,
        apns_id: Option<uuid::Uuid>,
        timestamp: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        if let Some(token) = self.token.as_mut() {
            token.invalidate();
        }
        info!(
            connection = %self.name,
            "[ConnectionHandler] Gateway reported an expired provider token"
        );
        self.begin_draining("expired provider token");

        let Some(mut pending) = self.correlator.take(stream_id) else {
            return;
        };

        if self.settings.retry_expired_tokens && pending.try_claim_expired_token_retry() {
            debug!(
                connection = %self.name,
                notification_id = pending.id(),
                "[ConnectionHandler] Resending after expired token"
            );
            self.resubmit(pending);
        } else {
            let notification = pending.notification().clone();
            pending.complete(Ok(PushNotificationResponse::rejected(
                notification,
                status,
                apns_id,
                Some(RejectionReason::ExpiredProviderToken),
                timestamp,
            )));
        }
    }

    fn handle_stream_error(&mut self, stream_id: u32, e: h2::Error) {
        if e.reason() == Some(Reason::REFUSED_STREAM) && !e.is_go_away() {
            if let Some(mut pending) = self.correlator.take(stream_id) {
                if self.accepting() && pending.try_claim_refused_stream_retry() {
                    debug!(
                        connection = %self.name,
                        stream_id,
                        "[ConnectionHandler] Stream refused, rewriting"
                    );
                    self.retry_queue.push_back(pending);
                } else {
                    pending.fail(PushError::NotProcessed);
                }
            }
            return;
        }

        if e.is_go_away() && e.is_remote() {
            // Above the gateway's last processed stream id
            self.correlator.fail(stream_id, PushError::NotProcessed);
            self.begin_draining("gateway sent GOAWAY");
            return;
        }

        debug!(connection = %self.name, stream_id, "[ConnectionHandler] Stream failed: {}", e);
        self.correlator
            .fail(stream_id, PushError::StreamClosedBeforeReply);
    }

    fn begin_draining(&mut self, reason: &str) {
        let deadline = Instant::now() + self.settings.graceful_shutdown_timeout;
        self.drain_until(reason, deadline);
    }

    /// Stop taking new streams and hand queued work back to the pool.
    /// In-flight streams may finish until `deadline`.
    fn drain_until(&mut self, reason: &str, deadline: Instant) {
        match self.state {
            HandlerState::Connected => {}
            HandlerState::Draining { deadline: current } => {
                if deadline < current {
                    self.state = HandlerState::Draining { deadline };
                }
                return;
            }
            HandlerState::Closed => return,
        }

        info!(
            connection = %self.name,
            in_flight = self.correlator.len(),
            "[ConnectionHandler] Draining: {}",
            reason
        );
        self.state = HandlerState::Draining { deadline };
        self.ready = false;
        // Dropping the sender lets h2 close the connection once streams finish
        self.send_request = None;
        let _ = self.events.send(PoolEvent::Draining { id: self.id });

        self.commands.close();
        while let Ok(pending) = self.commands.try_recv() {
            self.resubmit(pending);
        }
        while let Some(pending) = self.retry_queue.pop_front() {
            self.resubmit(pending);
        }
    }

    fn resubmit(&self, pending: PendingNotification) {
        // If the pool is gone the event is dropped, which fails the notification
        let _ = self.events.send(PoolEvent::Resubmit(pending));
    }

    fn finish(mut self) {
        self.state = HandlerState::Closed;

        self.in_flight.clear();
        let failed = self.correlator.drain_on_connection_loss();

        self.commands.close();
        while let Ok(pending) = self.commands.try_recv() {
            self.resubmit(pending);
        }
        while let Some(pending) = self.retry_queue.pop_front() {
            self.resubmit(pending);
        }

        self.send_request = None;
        self.abort_tasks();

        info!(connection = %self.name, failed, "[ConnectionHandler] Closed");
        let _ = self.events.send(PoolEvent::Closed { id: self.id });
    }

    fn abort_tasks(&mut self) {
        self.driver.abort();
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
    }
}

/// The pool aborts a connection's task outright when a forced shutdown
/// deadline passes, so `finish` never runs in that case.
impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

fn read_response(
    stream_id: u32,
    response: ResponseFuture,
) -> BoxFuture<'static, (u32, StreamResult)> {
    async move {
        let result = async {
            let response = response.await?;
            let (parts, mut body) = response.into_parts();

            let mut buffer = BytesMut::new();
            while let Some(chunk) = body.data().await {
                let chunk = chunk?;
                let _ = body.flow_control().release_capacity(chunk.len());
                buffer.extend_from_slice(&chunk);
            }
            Ok::<_, h2::Error>((parts, buffer.freeze()))
        }
        .await;

        (stream_id, result)
    }
    .boxed()
}

async fn wait_ready(sender: Option<&mut SendRequest<Bytes>>) -> Result<(), h2::Error> {
    match sender {
        Some(sender) => poll_fn(|cx| sender.poll_ready(cx)).await,
        None => future::pending().await,
    }
}

async fn recv_opt<T>(
    rx: &mut Option<oneshot::Receiver<T>>,
) -> Result<T, oneshot::error::RecvError> {
    match rx {
        Some(rx) => rx.await,
        None => future::pending().await,
    }
}
