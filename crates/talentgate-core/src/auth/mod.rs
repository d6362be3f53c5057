//! Authentication module for managing the signed-in session.
//!
//! This module provides:
//! - `Session`: the injected session object shared by all requests
//! - `TokenStore`: persistence of the access/refresh pair through a `Platform`
//! - `RefreshCoordinator`: single-flight refresh token exchange
//! - `SessionTerminator`: credential clearance plus navigation to sign-in
//! - `token`: local expiry checks on access tokens
//!
//! Access tokens live for a day and refresh tokens for 30 days.

pub mod platform;
pub mod refresh;
pub mod session;
pub mod store;
pub mod terminator;
pub mod token;

pub use platform::{
    EntryKey, FilePlatform, HeadlessPlatform, KeyringPlatform, MemoryPlatform, Platform, SameSite,
    StorageScope, StoreError, StoredEntry, TokenKind,
};
pub use refresh::{RefreshCoordinator, RefreshError};
pub use session::{Session, TokenPair};
pub use store::{SecurityPolicy, TokenStore};
pub use terminator::{SessionTerminator, TerminationReason};
pub use token::{decode_claims, is_expired, Claims, TokenError};
