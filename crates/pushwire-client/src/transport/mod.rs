//! Transport layer
//!
//! Opens the byte stream an HTTP/2 connection runs on: a direct TCP
//! connection or one supplied by a [`ProxyConnector`], optionally wrapped in
//! TLS negotiated for `h2` via ALPN.

mod credentials;
mod tls;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pushwire_core::ConfigError;
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

pub use credentials::{certificates_from_pem, ClientCertificate};

use crate::config::{ClientConfig, TlsMode};

/// Byte stream an HTTP/2 connection can run on
pub trait AsyncIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncIo for T {}

pub type BoxedIo = Box<dyn AsyncIo>;

/// Opens the raw byte stream to the gateway, e.g. through a SOCKS or HTTP
/// CONNECT proxy. TLS, when enabled, is layered on top of what it returns.
#[async_trait]
pub trait ProxyConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedIo>;

    /// Description for logging
    fn description(&self) -> String;
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP/2 handshake failed: {0}")]
    Handshake(#[from] h2::Error),

    #[error("Gateway did not negotiate HTTP/2")]
    AlpnMismatch,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Opens transport connections for the pool
pub struct Connector {
    host: String,
    port: u16,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    proxy: Option<Arc<dyn ProxyConnector>>,
    connect_timeout: Duration,
}

impl Connector {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let tls = match &config.tls {
            TlsMode::Plaintext => None,
            mode => {
                let client_config = tls::client_config(mode, config.auth.client_certificate())?;
                let server_name = ServerName::try_from(config.host.clone())
                    .map_err(|e| ConfigError::Tls(e.to_string()))?;
                Some((TlsConnector::from(client_config), server_name))
            }
        };

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            tls,
            proxy: config.proxy.clone(),
            connect_timeout: config.connect_timeout,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open a byte stream ready for the HTTP/2 handshake
    pub async fn connect(&self) -> Result<BoxedIo, ConnectError> {
        let stream: BoxedIo = match &self.proxy {
            Some(proxy) => {
                debug!(
                    "[Connector] Connecting to {}:{} via {}",
                    self.host,
                    self.port,
                    proxy.description()
                );
                proxy.connect(&self.host, self.port).await?
            }
            None => {
                debug!("[Connector] Connecting to {}:{}", self.host, self.port);
                let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
                tcp.set_nodelay(true)?;
                Box::new(tcp)
            }
        };

        let Some((connector, server_name)) = &self.tls else {
            return Ok(stream);
        };

        let tls = connector.connect(server_name.clone(), stream).await?;
        if tls.get_ref().1.alpn_protocol() != Some(b"h2".as_slice()) {
            return Err(ConnectError::AlpnMismatch);
        }
        Ok(Box::new(tls))
    }

    pub fn description(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}
