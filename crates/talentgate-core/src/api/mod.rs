//! REST API client module for the talentgate backend.
//!
//! This module provides the `ApiClient` every feature module uses to call
//! the backend. Requests carry the session's JWT bearer token; an expired or
//! rejected token is refreshed once through `/auth/refresh-token` before the
//! session is given up.

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiRequest};
pub use error::{classify_unauthorized, ApiError, AuthErrorCode, AuthFailure, ErrorBody};
