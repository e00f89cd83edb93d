//! Client certificate loading (PEM only)

use std::fmt;
use std::path::Path;

use pushwire_core::CredentialError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use zeroize::Zeroizing;

/// Certificate chain and private key presented during the TLS handshake
pub struct ClientCertificate {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ClientCertificate {
    /// Load from PEM data. The key may be PKCS#1, PKCS#8 or SEC1.
    pub fn from_pem(
        certificate_pem: &[u8],
        private_key_pem: &[u8],
    ) -> Result<Self, CredentialError> {
        let chain = certificates_from_pem(certificate_pem)?;

        let mut reader = private_key_pem;
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|e| CredentialError::Pem(e.to_string()))?
            .ok_or(CredentialError::Missing("private key"))?;

        Ok(Self { chain, key })
    }

    pub fn from_pem_files(
        certificate_path: impl AsRef<Path>,
        private_key_path: impl AsRef<Path>,
    ) -> Result<Self, CredentialError> {
        let certificate_pem = read(certificate_path.as_ref())?;
        let private_key_pem = read(private_key_path.as_ref())?;
        Self::from_pem(&certificate_pem, &private_key_pem)
    }

    pub(crate) fn chain(&self) -> Vec<CertificateDer<'static>> {
        self.chain.clone()
    }

    pub(crate) fn private_key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("chain_length", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Parse every `CERTIFICATE` block in a PEM document
pub fn certificates_from_pem(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let mut reader = pem;
    let certificates = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CredentialError::Pem(e.to_string()))?;

    if certificates.is_empty() {
        return Err(CredentialError::Missing("certificate"));
    }
    Ok(certificates)
}

pub(crate) fn read(path: &Path) -> Result<Zeroizing<Vec<u8>>, CredentialError> {
    std::fs::read(path)
        .map(Zeroizing::new)
        .map_err(|source| CredentialError::Io {
            path: path.display().to_string(),
            source,
        })
}
