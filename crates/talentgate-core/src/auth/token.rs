//! Access token inspection.
//!
//! Access tokens are JWT-shaped: three base64url segments, the middle one a
//! JSON payload with a numeric `exp` claim (seconds since epoch). Signatures
//! are not verified here; the server does that. This module only answers
//! "is it worth sending this token?".

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Tokens expiring within this window are treated as already expired so a
/// request is not sent with a credential that dies in flight.
pub const EXPIRY_BUFFER_MS: i64 = 30_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token has {0} segments, expected 3")]
    Segments(usize),

    #[error("Token payload is not valid base64url: {0}")]
    Encoding(String),

    #[error("Token payload is not valid JSON claims: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Claims {
    /// Expiry in seconds since the Unix epoch.
    pub exp: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sub: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub role: Option<String>,
}

/// Issuers disagree on whether ids are strings or numbers. Only `exp` is
/// load-bearing, so anything else odd decodes as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let millis = (self.exp * 1000.0).round();
        if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
            return None;
        }
        Utc.timestamp_millis_opt(millis as i64).single()
    }
}

/// Decode the payload segment of a token without verifying its signature.
pub fn decode_claims(token: &str) -> Result<Claims, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Segments(segments.len()));
    }

    // Some issuers pad their segments; base64url-no-pad rejects that.
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Encoding(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Payload(e.to_string()))
}

/// When the token expires, if it can be decoded.
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    decode_claims(token).ok().and_then(|c| c.expires_at())
}

/// Whether `token` should be considered expired right now.
///
/// Absent or undecodable tokens are always expired.
pub fn is_expired(token: Option<&str>) -> bool {
    is_expired_at(token, Utc::now())
}

/// Like [`is_expired`] with an explicit clock.
pub fn is_expired_at(token: Option<&str>, now: DateTime<Utc>) -> bool {
    let Some(token) = token else {
        return true;
    };
    match decode_claims(token).map(|c| c.expires_at()) {
        Ok(Some(expiry)) => expiry <= now + Duration::milliseconds(EXPIRY_BUFFER_MS),
        Ok(None) => true,
        Err(e) => {
            tracing::debug!(error = %e, "Treating undecodable token as expired");
            true
        }
    }
}
