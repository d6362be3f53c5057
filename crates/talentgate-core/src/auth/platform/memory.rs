//! In-memory platform for tests and short-lived processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use url::Url;

use super::{EntryKey, Platform, StoreError, StoredEntry};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<EntryKey, StoredEntry>,
    navigations: Vec<Url>,
}

/// Deterministic platform that keeps entries in a map and records every
/// navigation instead of performing it.
///
/// Clones share state, so a test can keep one handle and give another to the
/// session.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlatform {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an entry directly, bypassing the token store.
    pub fn insert(&self, key: EntryKey, entry: StoredEntry) {
        self.lock().entries.insert(key, entry);
    }

    pub fn entry(&self, key: &EntryKey) -> Option<StoredEntry> {
        self.lock().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Every location navigated to, oldest first.
    pub fn navigations(&self) -> Vec<Url> {
        self.lock().navigations.clone()
    }
}

impl Platform for MemoryPlatform {
    fn name(&self) -> &str {
        "memory"
    }

    fn retrieve(&self, key: &EntryKey) -> Result<Option<StoredEntry>, StoreError> {
        Ok(self.entry(key))
    }

    fn persist(&self, key: &EntryKey, entry: &StoredEntry) -> Result<(), StoreError> {
        self.insert(*key, entry.clone());
        Ok(())
    }

    fn remove(&self, key: &EntryKey) -> Result<(), StoreError> {
        self.lock().entries.remove(key);
        Ok(())
    }

    fn navigate(&self, location: &Url) {
        self.lock().navigations.push(location.clone());
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::auth::platform::{SameSite, StorageScope, TokenKind};

    #[test]
    fn test_clones_share_state() {
        let platform = MemoryPlatform::new();
        let handle = platform.clone();
        let key = EntryKey::new(TokenKind::Refresh, StorageScope::Legacy);

        platform
            .persist(
                &key,
                &StoredEntry {
                    value: "r".into(),
                    expires_at: Utc::now(),
                    path: None,
                    secure: false,
                    same_site: SameSite::Lax,
                },
            )
            .unwrap();
        assert_eq!(handle.entry(&key).map(|e| e.value), Some("r".to_string()));

        handle.remove(&key).unwrap();
        assert!(platform.is_empty());

        platform.navigate(&Url::parse("http://localhost/auth/login").unwrap());
        assert_eq!(handle.navigations().len(), 1);
    }
}
