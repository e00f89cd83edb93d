//! Per-connection authentication token cache
//!
//! Each connection mints its own token on first use and keeps at most one.
//! The cached token is dropped when its lifetime runs out or when the gateway
//! reports it expired, so the next request mints a fresh one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use http::HeaderValue;
use pushwire_core::{AuthenticationToken, SigningKey, TokenError};
use tokio::time::Instant;
use tracing::debug;

struct CachedToken {
    header: HeaderValue,
    expires_at: Instant,
}

pub(crate) struct TokenCache {
    signing_key: Arc<SigningKey>,
    lifetime: Duration,
    current: Option<CachedToken>,
}

impl TokenCache {
    pub(crate) fn new(signing_key: Arc<SigningKey>, lifetime: Duration) -> Self {
        Self {
            signing_key,
            lifetime,
            current: None,
        }
    }

    /// `authorization` header value, minting a token if none is cached
    pub(crate) fn authorization_header(&mut self) -> Result<HeaderValue, TokenError> {
        let now = Instant::now();
        if let Some(cached) = &self.current {
            if now < cached.expires_at {
                return Ok(cached.header.clone());
            }
        }

        let token = AuthenticationToken::new(&self.signing_key, Utc::now())?;
        let header =
            HeaderValue::from_str(token.authorization_header()).map_err(|_| TokenError::Malformed)?;
        debug!(
            key_id = %self.signing_key.key_id(),
            issued_at = %token.issued_at(),
            "[TokenCache] Minted authentication token"
        );

        self.current = Some(CachedToken {
            header: header.clone(),
            expires_at: now + self.lifetime,
        });
        Ok(header)
    }

    /// When the cached token should be dropped, if one is cached
    pub(crate) fn expires_at(&self) -> Option<Instant> {
        self.current.as_ref().map(|cached| cached.expires_at)
    }

    /// Drop the cached token. Returns whether one was cached.
    pub(crate) fn invalidate(&mut self) -> bool {
        self.current.take().is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self) -> bool {
        self.current.is_some()
    }
}
