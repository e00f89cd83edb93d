//! ES256 signing and verification keys

use std::fmt;
use std::path::Path;

use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED,
    ECDSA_P256_SHA256_FIXED_SIGNING,
};
use zeroize::Zeroizing;

use crate::error::CredentialError;

/// Private key a provider uses to sign authentication tokens, together with
/// the key id and team id the gateway issued it under.
pub struct SigningKey {
    key_pair: EcdsaKeyPair,
    team_id: String,
    key_id: String,
    rng: SystemRandom,
}

impl SigningKey {
    /// Load a key from PKCS#8 DER bytes
    pub fn from_pkcs8_der(
        der: &[u8],
        team_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, der, &rng)
            .map_err(|e| CredentialError::Rejected(e.to_string()))?;

        Ok(Self {
            key_pair,
            team_id: team_id.into(),
            key_id: key_id.into(),
            rng,
        })
    }

    /// Load a key from a PEM document containing a `PRIVATE KEY` block
    /// (the `.p8` files issued by the gateway's developer portal).
    pub fn from_pkcs8_pem(
        pem: &[u8],
        team_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let mut reader = pem;
        let key = rustls_pemfile::pkcs8_private_keys(&mut reader)
            .next()
            .ok_or(CredentialError::Missing("PKCS#8 private key"))?
            .map_err(|e| CredentialError::Pem(e.to_string()))?;

        Self::from_pkcs8_der(key.secret_pkcs8_der(), team_id, key_id)
    }

    /// Load a key from a PEM file on disk
    pub fn from_pkcs8_file(
        path: impl AsRef<Path>,
        team_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let pem = Zeroizing::new(std::fs::read(path).map_err(|source| CredentialError::Io {
            path: path.display().to_string(),
            source,
        })?);

        tracing::debug!(path = %path.display(), "[Keys] Loading signing key");
        Self::from_pkcs8_pem(&pem, team_id, key_id)
    }

    /// Generate a fresh P-256 key. Useful for local gateways and tests.
    pub fn generate(
        team_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| CredentialError::Rejected("key generation failed".to_string()))?;

        Self::from_pkcs8_der(document.as_ref(), team_id, key_id)
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign `message`, returning a fixed-length (r || s) signature
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CredentialError> {
        let signature = self
            .key_pair
            .sign(&self.rng, message)
            .map_err(|_| CredentialError::Signing)?;
        Ok(signature.as_ref().to_vec())
    }

    /// Public half of this key, for gateways that need to verify its tokens
    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey::new(
            self.key_pair.public_key().as_ref().to_vec(),
            self.team_id.clone(),
            self.key_id.clone(),
        )
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Public key used to check token signatures
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationKey {
    public_key: Vec<u8>,
    team_id: String,
    key_id: String,
}

impl VerificationKey {
    /// Build from an uncompressed SEC1 P-256 point
    pub fn new(public_key: Vec<u8>, team_id: impl Into<String>, key_id: impl Into<String>) -> Self {
        Self {
            public_key,
            team_id: team_id.into(),
            key_id: key_id.into(),
        }
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Check a fixed-length ES256 signature over `message`
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &self.public_key)
            .verify(message, signature)
            .is_ok()
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .field("public_key", &format_args!("{} bytes", self.public_key.len()))
            .finish()
    }
}
