//! Server-side TLS for the mock gateway

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

/// TLS configuration serving `certificate_pem` with ALPN `h2`.
///
/// With `client_ca_pem`, clients must present a certificate issued by one of
/// those CAs, as with certificate-authenticated gateways.
pub fn server_config(
    certificate_pem: &[u8],
    private_key_pem: &[u8],
    client_ca_pem: Option<&[u8]>,
) -> Result<Arc<ServerConfig>> {
    let chain = rustls_pemfile::certs(&mut &certificate_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid server certificate PEM")?;
    let key = rustls_pemfile::private_key(&mut &private_key_pem[..])
        .context("Invalid server private key PEM")?
        .ok_or_else(|| anyhow!("No private key found in PEM"))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?;

    let builder = match client_ca_pem {
        Some(pem) => {
            let mut roots = RootCertStore::empty();
            for certificate in rustls_pemfile::certs(&mut &pem[..]) {
                roots
                    .add(certificate.context("Invalid client CA PEM")?)
                    .context("Unusable client CA certificate")?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .context("Failed to build client certificate verifier")?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder
        .with_single_cert(chain, key)
        .context("Server certificate and key do not match")?;
    config.alpn_protocols = vec![b"h2".to_vec()];

    Ok(Arc::new(config))
}
