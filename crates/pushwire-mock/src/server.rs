//! Mock gateway server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use h2::server::SendResponse;
use h2::RecvStream;
use http::{HeaderValue, Request, Response, StatusCode};
use parking_lot::Mutex;
use pushwire_core::wire::{ErrorBody, HEADER_APNS_ID, HEADER_UNIQUE_ID};
use pushwire_core::RejectionReason;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handler::{
    HandlerError, NotificationRequest, PushNotificationHandler, PushNotificationHandlerFactory,
};
use crate::listener::MockGatewayListener;

/// How long connections get to finish their streams after shutdown starts
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type SharedHandler = Arc<Mutex<Box<dyn PushNotificationHandler>>>;

#[derive(Clone)]
pub struct MockGatewayConfig {
    pub handler_factory: Arc<dyn PushNotificationHandlerFactory>,
    pub listener: Option<Arc<dyn MockGatewayListener>>,
    /// Serve TLS with this configuration; plaintext HTTP/2 when `None`
    pub tls: Option<Arc<ServerConfig>>,
    /// Advertised `SETTINGS_MAX_CONCURRENT_STREAMS`
    pub max_concurrent_streams: Option<u32>,
}

impl MockGatewayConfig {
    pub fn new(handler_factory: impl PushNotificationHandlerFactory + 'static) -> Self {
        Self {
            handler_factory: Arc::new(handler_factory),
            listener: None,
            tls: None,
            max_concurrent_streams: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn MockGatewayListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_tls(mut self, tls: Arc<ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = Some(max);
        self
    }
}

/// A running mock gateway
pub struct MockGateway {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MockGateway {
    /// Bind `addr` and start accepting connections in the background
    pub async fn start(addr: impl ToSocketAddrs, config: MockGatewayConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind mock gateway")?;
        let local_addr = listener.local_addr()?;
        info!(
            "[MockGateway] Listening on {} ({})",
            local_addr,
            if config.tls.is_some() { "TLS" } else { "plaintext" }
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, Arc::new(config), cancel.clone()));

        Ok(Self {
            local_addr,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting connections, send GOAWAY on open ones and wait for
    /// their streams to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("[MockGateway] Stopped listening on {}", self.local_addr);
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<MockGatewayConfig>,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(accept_connection(
                        stream,
                        peer,
                        config.clone(),
                        cancel.clone(),
                    ));
                }
                Err(e) => warn!("[MockGateway] Accept failed: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("[MockGateway] Connections still open after {:?}, aborting", SHUTDOWN_GRACE);
        connections.abort_all();
    }
}

async fn accept_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<MockGatewayConfig>,
    cancel: CancellationToken,
) {
    let _ = stream.set_nodelay(true);

    match config.tls.clone() {
        Some(tls) => match TlsAcceptor::from(tls).accept(stream).await {
            Ok(stream) => serve_connection(stream, peer, config, cancel).await,
            Err(e) => warn!("[MockGateway] TLS handshake with {} failed: {}", peer, e),
        },
        None => serve_connection(stream, peer, config, cancel).await,
    }
}

async fn serve_connection<T>(
    io: T,
    peer: SocketAddr,
    config: Arc<MockGatewayConfig>,
    cancel: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut builder = h2::server::Builder::new();
    if let Some(max) = config.max_concurrent_streams {
        builder.max_concurrent_streams(max);
    }

    let mut connection = match builder.handshake::<_, Bytes>(io).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!("[MockGateway] HTTP/2 handshake with {} failed: {}", peer, e);
            return;
        }
    };
    debug!("[MockGateway] Accepted connection from {}", peer);

    let handler: SharedHandler = Arc::new(Mutex::new(config.handler_factory.build_handler()));
    let mut closing = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled(), if !closing => {
                closing = true;
                connection.graceful_shutdown();
            }
            next = connection.accept() => match next {
                Some(Ok((request, respond))) => {
                    tokio::spawn(handle_stream(
                        request,
                        respond,
                        handler.clone(),
                        config.listener.clone(),
                    ));
                }
                Some(Err(e)) => {
                    debug!("[MockGateway] Connection from {} ended: {}", peer, e);
                    break;
                }
                None => break,
            },
        }
    }

    debug!("[MockGateway] Closed connection from {}", peer);
}

async fn handle_stream(
    request: Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
    handler: SharedHandler,
    listener: Option<Arc<dyn MockGatewayListener>>,
) {
    let (parts, mut body) = request.into_parts();

    let mut payload = BytesMut::new();
    while let Some(chunk) = body.data().await {
        match chunk {
            Ok(chunk) => {
                let _ = body.flow_control().release_capacity(chunk.len());
                payload.extend_from_slice(&chunk);
            }
            Err(e) => {
                debug!("[MockGateway] Stream reset while reading payload: {}", e);
                return;
            }
        }
    }

    let notification = NotificationRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        headers: parts.headers,
        payload: payload.freeze(),
    };

    // A malformed apns-id is answered without one
    let apns_id = match notification.header(HEADER_APNS_ID) {
        Some(value) => Uuid::parse_str(value).ok(),
        None => Some(Uuid::new_v4()),
    };

    let decision = handler.lock().handle_notification(&notification);
    let (status, body) = match decision {
        Ok(()) => {
            if let Some(listener) = &listener {
                listener.handle_notification_accepted(&notification);
            }
            (StatusCode::OK, None)
        }
        Err(HandlerError::Rejected { reason, timestamp }) => {
            debug!(path = %notification.path, "[MockGateway] Rejecting notification: {}", reason);
            if let Some(listener) = &listener {
                listener.handle_notification_rejected(&notification, &reason, timestamp);
            }
            let status =
                StatusCode::from_u16(reason.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
            (status, Some(ErrorBody::encode(&reason, timestamp)))
        }
        Err(HandlerError::Internal(message)) => {
            warn!("[MockGateway] Handler failed: {}", message);
            let reason = RejectionReason::InternalServerError;
            if let Some(listener) = &listener {
                listener.handle_notification_rejected(&notification, &reason, None);
            }
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(ErrorBody::encode(&reason, None)),
            )
        }
    };

    let mut response = Response::builder().status(status);
    if let Some(apns_id) = apns_id {
        response = response.header(HEADER_APNS_ID, apns_id.to_string());
    }
    if status == StatusCode::OK {
        response = response.header(HEADER_UNIQUE_ID, Uuid::new_v4().to_string());
    } else {
        response = response.header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }

    let response = match response.body(()) {
        Ok(response) => response,
        Err(e) => {
            warn!("[MockGateway] Failed to build response: {}", e);
            return;
        }
    };

    let end_of_stream = body.is_none();
    let mut stream = match respond.send_response(response, end_of_stream) {
        Ok(stream) => stream,
        Err(e) => {
            debug!("[MockGateway] Failed to send response: {}", e);
            return;
        }
    };
    if let Some(body) = body {
        if let Err(e) = stream.send_data(Bytes::from(body), true) {
            debug!("[MockGateway] Failed to send response body: {}", e);
        }
    }
}
