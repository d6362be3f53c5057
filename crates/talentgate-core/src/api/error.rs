use thiserror::Error;

use crate::auth::{RefreshError, StoreError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Session is no longer valid: {0}")]
    InvalidSession(String),

    #[error("Not signed in")]
    NoSession,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[from] RefreshError),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Token storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

impl ApiError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = ErrorBody::parse(body)
            .message
            .unwrap_or_else(|| truncate_body(body));
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(detail),
            404 => ApiError::NotFound(detail),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(detail),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, detail)),
        }
    }

    /// Whether this error ended the session.
    pub fn is_session_ended(&self) -> bool {
        matches!(
            self,
            ApiError::InvalidSession(_) | ApiError::NoSession | ApiError::RefreshFailed(_)
        )
    }
}

/// The `{ success: false, message, code }` error body the backend sends.
/// Anything unparsable yields an empty body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    pub message: Option<String>,
    pub code: Option<String>,
}

impl ErrorBody {
    pub fn parse(body: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(_) => return Self::default(),
        };
        let field = |name: &str| {
            value
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        Self {
            message: field("message").or_else(|| field("error")),
            code: field("code"),
        }
    }
}

/// Structured reasons the server gives for rejecting credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorCode {
    TokenExpired,
    TokenInvalid,
    InvalidSignature,
    SessionExpired,
    SessionRevoked,
    TokenMissing,
    Unknown,
}

impl AuthErrorCode {
    pub fn parse(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "TOKEN_EXPIRED" => AuthErrorCode::TokenExpired,
            "TOKEN_INVALID" | "INVALID_TOKEN" => AuthErrorCode::TokenInvalid,
            "INVALID_SIGNATURE" => AuthErrorCode::InvalidSignature,
            "SESSION_EXPIRED" => AuthErrorCode::SessionExpired,
            "SESSION_REVOKED" => AuthErrorCode::SessionRevoked,
            "TOKEN_MISSING" | "NO_TOKEN" => AuthErrorCode::TokenMissing,
            _ => AuthErrorCode::Unknown,
        }
    }

    pub fn is_invalid_session(&self) -> bool {
        matches!(
            self,
            AuthErrorCode::TokenExpired
                | AuthErrorCode::TokenInvalid
                | AuthErrorCode::InvalidSignature
                | AuthErrorCode::SessionExpired
                | AuthErrorCode::SessionRevoked
        )
    }
}

/// How a 401 should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The server says the session is dead; refreshing will not help.
    InvalidSession,
    /// Nothing conclusive; one refresh-and-retry is worth trying.
    Ambiguous,
}

/// Message fragments that mark a session as unrecoverable. Matched
/// case-sensitively: the token middleware words its rejections in lower case,
/// while capitalised messages such as "Invalid credentials" come from
/// ordinary endpoints and are worth a refresh.
const INVALID_SESSION_MARKERS: [&str; 4] = ["invalid", "expired", "signature", "Session expired"];

/// Classify a 401 body. A recognised `code` wins; otherwise the message text
/// is searched for invalid-session markers.
pub fn classify_unauthorized(body: &ErrorBody) -> AuthFailure {
    match body.code.as_deref().map(AuthErrorCode::parse) {
        Some(code) if code.is_invalid_session() => return AuthFailure::InvalidSession,
        Some(AuthErrorCode::TokenMissing) => return AuthFailure::Ambiguous,
        _ => {}
    }

    let message = body.message.as_deref().unwrap_or_default();
    if INVALID_SESSION_MARKERS.iter().any(|m| message.contains(m)) {
        AuthFailure::InvalidSession
    } else {
        AuthFailure::Ambiguous
    }
}
