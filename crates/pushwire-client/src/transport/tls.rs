//! rustls client configuration

use std::sync::Arc;

use pushwire_core::ConfigError;
use rustls::RootCertStore;

use super::ClientCertificate;
use crate::config::TlsMode;

const ALPN_H2: &[u8] = b"h2";

pub(super) fn client_config(
    mode: &TlsMode,
    certificate: Option<&Arc<ClientCertificate>>,
) -> Result<Arc<rustls::ClientConfig>, ConfigError> {
    let mut roots = RootCertStore::empty();
    match mode {
        TlsMode::WebPki => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        TlsMode::TrustedCertificates(certificates) => {
            for certificate in certificates {
                roots
                    .add(certificate.clone())
                    .map_err(|e| ConfigError::Tls(e.to_string()))?;
            }
        }
        TlsMode::Plaintext => {
            return Err(ConfigError::Tls(
                "plaintext mode has no TLS configuration".to_string(),
            ))
        }
    }

    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ConfigError::Tls(e.to_string()))?
    .with_root_certificates(roots);

    let mut config = match certificate {
        Some(certificate) => builder
            .with_client_auth_cert(certificate.chain(), certificate.private_key())
            .map_err(|e| ConfigError::Tls(e.to_string()))?,
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    Ok(Arc::new(config))
}
