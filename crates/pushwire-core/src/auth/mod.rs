//! Provider authentication
//!
//! Token-based deployments authenticate each request with a short-lived,
//! ES256-signed bearer token instead of a client certificate. The client side
//! mints tokens with a [`SigningKey`]; the gateway side parses them with
//! [`AuthenticationToken::parse`] and checks them against a [`VerificationKey`].

mod keys;
mod token;

pub use keys::{SigningKey, VerificationKey};
pub use token::AuthenticationToken;
