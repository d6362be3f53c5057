//! Execution platform capabilities: persisting credential entries and
//! navigating to the login entry point.
//!
//! - [`HeadlessPlatform`] - no storage, no navigation (non-interactive runs)
//! - [`MemoryPlatform`] - in-process, records navigations (tests, ephemeral use)
//! - [`FilePlatform`] - JSON session file in the user cache directory
//! - [`KeyringPlatform`] - OS keychain

mod file;
mod keyring;
mod memory;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

pub use file::FilePlatform;
pub use self::keyring::KeyringPlatform;
pub use memory::MemoryPlatform;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt stored entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] ::keyring::Error),
}

/// Which credential an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub const ALL: [TokenKind; 2] = [TokenKind::Access, TokenKind::Refresh];

    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Access => "accessToken",
            TokenKind::Refresh => "refreshToken",
        }
    }
}

/// Where an entry lives. Earlier releases wrote unscoped entries; current
/// ones always write at the root path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    Root,
    Legacy,
}

impl StorageScope {
    pub const ALL: [StorageScope; 2] = [StorageScope::Root, StorageScope::Legacy];

    pub fn path(&self) -> Option<&'static str> {
        match self {
            StorageScope::Root => Some("/"),
            StorageScope::Legacy => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub kind: TokenKind,
    pub scope: StorageScope,
}

impl EntryKey {
    pub fn new(kind: TokenKind, scope: StorageScope) -> Self {
        Self { kind, scope }
    }

    /// Flat key used by backends that store entries by string name.
    pub fn storage_key(&self) -> String {
        match self.scope.path() {
            Some(path) => format!("{}@{}", self.kind.name(), path),
            None => self.kind.name().to_string(),
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Lax,
    None,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub path: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
}

impl StoredEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Debug for StoredEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredEntry")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("same_site", &self.same_site)
            .finish()
    }
}

/// Capabilities the session needs from wherever it runs.
///
/// Implementations must be thread-safe; the token store serializes writes
/// against reads itself.
pub trait Platform: Send + Sync {
    /// Backend name, for logging.
    fn name(&self) -> &str;

    fn retrieve(&self, key: &EntryKey) -> Result<Option<StoredEntry>, StoreError>;

    /// Overwrite any entry under `key`.
    fn persist(&self, key: &EntryKey, entry: &StoredEntry) -> Result<(), StoreError>;

    /// Remove the entry under `key`. Removing a missing entry is not an error.
    fn remove(&self, key: &EntryKey) -> Result<(), StoreError>;

    /// Full navigation to `location`.
    fn navigate(&self, location: &Url);
}

impl<T: Platform + ?Sized> Platform for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn retrieve(&self, key: &EntryKey) -> Result<Option<StoredEntry>, StoreError> {
        (**self).retrieve(key)
    }

    fn persist(&self, key: &EntryKey, entry: &StoredEntry) -> Result<(), StoreError> {
        (**self).persist(key, entry)
    }

    fn remove(&self, key: &EntryKey) -> Result<(), StoreError> {
        (**self).remove(key)
    }

    fn navigate(&self, location: &Url) {
        (**self).navigate(location)
    }
}

/// Platform for contexts with nowhere to store credentials and nothing to
/// navigate, such as batch jobs or server-side rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessPlatform;

impl Platform for HeadlessPlatform {
    fn name(&self) -> &str {
        "headless"
    }

    fn retrieve(&self, _key: &EntryKey) -> Result<Option<StoredEntry>, StoreError> {
        Ok(None)
    }

    fn persist(&self, _key: &EntryKey, _entry: &StoredEntry) -> Result<(), StoreError> {
        Ok(())
    }

    fn remove(&self, _key: &EntryKey) -> Result<(), StoreError> {
        Ok(())
    }

    fn navigate(&self, location: &Url) {
        info!(location = %location, "No interactive context, skipping navigation");
    }
}

/// Callback invoked when a desktop platform is asked to navigate.
pub type NavigationHook = Box<dyn Fn(&Url) + Send + Sync>;
