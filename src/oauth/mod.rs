//! OAuth2 on both sides of the wire.
//!
//! [`client`] acquires and renews the tokens this service *sends*;
//! [`server`] verifies the tokens it *receives*. They only share the HTTP transport.

pub mod client;
pub mod renew;
pub mod server;

pub use client::{ManagerOptions, OutboundError, TokenManager};
pub use server::{AuthorizedClaims, InboundError, InboundValidator};

use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::{Map, Value};

/// Decode a JWT payload without checking anything about it.
pub(crate) fn unverified_payload(token: &str) -> Option<Map<String, Value>> {
    let payload = token.split('.').nth(1)?;
    let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('=')).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(claims) => Some(claims),
        _ => None,
    }
}
