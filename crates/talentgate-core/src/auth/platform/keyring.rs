//! OS keychain platform.

use std::fmt;

use ::keyring::Entry;
use tracing::{debug, info};
use url::Url;

use super::{EntryKey, NavigationHook, Platform, StoreError, StoredEntry};
use crate::config::APP_NAME;

/// Stores each entry as a keychain item: service `talentgate`, account
/// `<name>@<scope>`, secret the JSON-encoded entry.
pub struct KeyringPlatform {
    service: String,
    on_navigate: Option<NavigationHook>,
}

impl KeyringPlatform {
    pub fn new() -> Self {
        Self::with_service(APP_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
            on_navigate: None,
        }
    }

    pub fn with_navigation_hook(mut self, hook: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        self.on_navigate = Some(Box::new(hook));
        self
    }

    fn entry(&self, key: &EntryKey) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, &key.storage_key())?)
    }
}

impl Default for KeyringPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyringPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringPlatform")
            .field("service", &self.service)
            .field("has_navigation_hook", &self.on_navigate.is_some())
            .finish()
    }
}

impl Platform for KeyringPlatform {
    fn name(&self) -> &str {
        "keyring"
    }

    fn retrieve(&self, key: &EntryKey) -> Result<Option<StoredEntry>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(serde_json::from_str(&secret)?)),
            Err(::keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, key: &EntryKey, entry: &StoredEntry) -> Result<(), StoreError> {
        debug!(key = %key, service = %self.service, "Storing session entry in keychain");
        let secret = serde_json::to_string(entry)?;
        self.entry(key)?.set_password(&secret)?;
        Ok(())
    }

    fn remove(&self, key: &EntryKey) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(::keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn navigate(&self, location: &Url) {
        info!(location = %location, "Session ended, sign-in required");
        if let Some(ref hook) = self.on_navigate {
            hook(location);
        }
    }
}
