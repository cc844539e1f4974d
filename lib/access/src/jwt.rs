//! Unverified JWT payload inspection.
//!
//! The gate never trusts these claims for authorization. They feed two
//! advisory checks only: the login nonce comparison and the early-expiry
//! shortcut before live verification.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Decodes the payload segment of a compact JWT. Returns `None` for opaque
/// tokens or anything that does not decode to a JSON object.
#[must_use]
pub fn unverified_claims(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.is_object().then_some(claims)
}

/// The `nonce` claim of an ID token, if present.
#[must_use]
pub fn nonce_claim(id_token: &str) -> Option<String> {
    unverified_claims(id_token)?
        .get("nonce")?
        .as_str()
        .map(str::to_string)
}

/// The `exp` claim of a token, if it is a JWT that carries one.
#[must_use]
pub fn expiry_claim(token: &str) -> Option<DateTime<Utc>> {
    let exp = unverified_claims(token)?.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}
