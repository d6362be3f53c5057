//! Core library for talentgate.
//!
//! Holds the authenticated request pipeline shared by every client: token
//! storage, local expiry checks, single-flight refresh, and session
//! termination. Front ends supply a [`auth::Platform`] for persistence and
//! navigation and call the backend through [`ApiClient`].

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, ApiRequest};
pub use auth::{Platform, Session, TerminationReason, TokenPair};
pub use config::{Config, ConfigError, Deployment};
pub use models::{CurrentUser, LoginOutcome};
