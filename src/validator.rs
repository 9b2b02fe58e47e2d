//! Local JWT inspection
//!
//! Tokens are decoded without verifying their signature. The result only
//! decides whether it is worth presenting a token to the backend; the backend
//! stays authoritative.

use crate::error::{ClientError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

/// Claims read from the token payload
#[derive(Debug, Clone, Deserialize)]
pub struct JwtClaims {
    /// Expiration time (Unix timestamp, seconds)
    pub exp: i64,
}

/// Decode the payload segment of a JWT
pub fn decode_claims(token: &str) -> Result<JwtClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(ClientError::MalformedToken(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    }

    let payload = parts[1].trim_end_matches('=');
    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| ClientError::MalformedToken(format!("invalid base64 payload: {e}")))?;

    serde_json::from_slice(&decoded)
        .map_err(|e| ClientError::MalformedToken(format!("invalid claims: {e}")))
}

/// Expiry instant claimed by the token
pub fn expires_at(token: &str) -> Result<DateTime<Utc>> {
    let claims = decode_claims(token)?;
    DateTime::from_timestamp(claims.exp, 0)
        .ok_or_else(|| ClientError::MalformedToken(format!("exp out of range: {}", claims.exp)))
}

/// Check a token against `now`, failing closed
pub fn check_at(token: &str, now: DateTime<Utc>) -> Result<()> {
    if expires_at(token)? > now {
        Ok(())
    } else {
        Err(ClientError::TokenExpired)
    }
}

/// Whether the token's expiry is strictly after `now`
pub fn is_valid_at(token: &str, now: DateTime<Utc>) -> bool {
    match check_at(token, now) {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "Rejecting stored token");
            false
        }
    }
}

/// Whether the token is currently usable
pub fn is_valid(token: &str) -> bool {
    is_valid_at(token, Utc::now())
}
