//! Bearer authentication token
//!
//! Format: `base64url(header).base64url(claims).base64url(signature)` with no
//! padding. Header is `{"alg":"ES256","typ":"JWT","kid":<key id>}`, claims are
//! `{"iss":<team id>,"iat":<epoch seconds>}`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{SigningKey, VerificationKey};
use crate::error::TokenError;

const ALGORITHM: &str = "ES256";
const TOKEN_TYPE: &str = "JWT";
const BEARER_PREFIX: &str = "bearer ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
    kid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TokenClaims {
    iss: String,
    iat: i64,
}

/// A signed, time-stamped bearer credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationToken {
    header: TokenHeader,
    claims: TokenClaims,
    signature: Vec<u8>,
    encoded: String,
    authorization_header: String,
}

impl AuthenticationToken {
    /// Mint a token signed by `signing_key`, issued at `issued_at`
    /// (truncated to whole seconds).
    pub fn new(signing_key: &SigningKey, issued_at: DateTime<Utc>) -> Result<Self, TokenError> {
        let header = TokenHeader {
            alg: ALGORITHM.to_string(),
            typ: Some(TOKEN_TYPE.to_string()),
            kid: signing_key.key_id().to_string(),
        };
        let claims = TokenClaims {
            iss: signing_key.team_id().to_string(),
            iat: issued_at.timestamp(),
        };

        let header_json =
            serde_json::to_vec(&header).map_err(|e| TokenError::Json(e.to_string()))?;
        let claims_json =
            serde_json::to_vec(&claims).map_err(|e| TokenError::Json(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature = signing_key
            .sign(signing_input.as_bytes())
            .map_err(|_| TokenError::Signing)?;
        let encoded = format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(&signature));

        Ok(Self::assemble(header, claims, signature, encoded))
    }

    /// Decode a token string. A successfully parsed token is not necessarily
    /// valid; check it with [`AuthenticationToken::verify_signature`].
    pub fn parse(encoded: &str) -> Result<Self, TokenError> {
        let segments: Vec<&str> = encoded.split('.').collect();
        if segments.len() != 3 {
            return Err(TokenError::Malformed);
        }

        let header: TokenHeader = decode_json(segments[0])?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }
        let claims: TokenClaims = decode_json(segments[1])?;
        let signature = decode_segment(segments[2])?;

        Ok(Self::assemble(header, claims, signature, encoded.to_string()))
    }

    /// Decode a token from an `authorization` header value (`bearer <token>`)
    pub fn from_authorization_header(value: &str) -> Result<Self, TokenError> {
        let encoded = value
            .get(..BEARER_PREFIX.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(BEARER_PREFIX))
            .map(|_| &value[BEARER_PREFIX.len()..])
            .ok_or(TokenError::Malformed)?;

        Self::parse(encoded.trim())
    }

    fn assemble(
        header: TokenHeader,
        claims: TokenClaims,
        signature: Vec<u8>,
        encoded: String,
    ) -> Self {
        let authorization_header = format!("{}{}", BEARER_PREFIX, encoded);
        Self {
            header,
            claims,
            signature,
            encoded,
            authorization_header,
        }
    }

    /// Check the signature, key id and team id against a verification key
    pub fn verify_signature(&self, key: &VerificationKey) -> bool {
        if self.header.kid != key.key_id() || self.claims.iss != key.team_id() {
            return false;
        }

        match self.encoded.rfind('.') {
            Some(split) => key.verify(self.encoded[..split].as_bytes(), &self.signature),
            None => false,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.header.kid
    }

    pub fn team_id(&self) -> &str {
        &self.claims.iss
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.claims.iat, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// The encoded token without the `bearer` prefix
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Value for the `authorization` request header
    pub fn authorization_header(&self) -> &str {
        &self.authorization_header
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, TokenError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Encoding(e.to_string()))
}

fn decode_json<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = decode_segment(segment)?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Json(e.to_string()))
}
