//! Token persistence with environment-aware security attributes.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use super::platform::{EntryKey, Platform, SameSite, StorageScope, StoreError, StoredEntry, TokenKind};
use super::session::TokenPair;
use crate::config::Deployment;

/// Access tokens are kept for a day, matching their server-side lifetime.
pub const ACCESS_TOKEN_TTL_DAYS: i64 = 1;

/// Refresh tokens are kept for 30 days.
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    /// Only send over secure transport.
    pub secure: bool,
    /// Allow the entry to travel on cross-site requests.
    pub cross_site: bool,
}

impl SecurityPolicy {
    pub fn for_deployment(deployment: Deployment) -> Self {
        match deployment {
            Deployment::Production => Self {
                secure: true,
                cross_site: true,
            },
            Deployment::Local => Self {
                secure: false,
                cross_site: false,
            },
        }
    }

    pub fn same_site(&self) -> SameSite {
        if self.cross_site {
            SameSite::None
        } else {
            SameSite::Lax
        }
    }
}

struct Inner {
    platform: Arc<dyn Platform>,
    policy: SecurityPolicy,
    // writers (set/clear) exclude readers so a replaced pair is never observed half-written
    lock: RwLock<()>,
}

/// Sole owner of the persisted session. Clones share the same backend.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<Inner>,
}

impl TokenStore {
    pub fn new(platform: Arc<dyn Platform>, deployment: Deployment) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                policy: SecurityPolicy::for_deployment(deployment),
                lock: RwLock::new(()),
            }),
        }
    }

    pub fn policy(&self) -> SecurityPolicy {
        self.inner.policy
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.inner.platform
    }

    /// Current value of `kind`, if any. Backend failures read as absent.
    pub fn get(&self, kind: TokenKind) -> Option<String> {
        let _guard = self.inner.lock.read().unwrap_or_else(PoisonError::into_inner);
        self.read_unlocked(kind)
    }

    /// Both tokens, read consistently, or `None` unless both are present.
    pub fn pair(&self) -> Option<TokenPair> {
        let _guard = self.inner.lock.read().unwrap_or_else(PoisonError::into_inner);
        Some(TokenPair {
            access_token: self.read_unlocked(TokenKind::Access)?,
            refresh_token: self.read_unlocked(TokenKind::Refresh)?,
        })
    }

    /// Replace the session with a fresh pair.
    ///
    /// Residue under every scope is removed first. If the second write fails
    /// the first is rolled back so the store never holds a lone token.
    pub fn set(&self, access_token: &str, refresh_token: &str) -> Result<(), StoreError> {
        let _guard = self.inner.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.remove_all_unlocked()?;

        let access = EntryKey::new(TokenKind::Access, StorageScope::Root);
        let refresh = EntryKey::new(TokenKind::Refresh, StorageScope::Root);

        self.inner
            .platform
            .persist(&access, &self.entry(access_token, ACCESS_TOKEN_TTL_DAYS))?;
        if let Err(e) = self
            .inner
            .platform
            .persist(&refresh, &self.entry(refresh_token, REFRESH_TOKEN_TTL_DAYS))
        {
            warn!(error = %e, backend = self.inner.platform.name(), "Failed to store refresh token, rolling back");
            if let Err(rollback) = self.inner.platform.remove(&access) {
                warn!(error = %rollback, "Failed to roll back access token");
            }
            return Err(e);
        }

        debug!(backend = self.inner.platform.name(), "Session tokens stored");
        Ok(())
    }

    /// Remove both tokens under every scope.
    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.inner.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.remove_all_unlocked()?;
        debug!(backend = self.inner.platform.name(), "Session tokens cleared");
        Ok(())
    }

    fn entry(&self, value: &str, ttl_days: i64) -> StoredEntry {
        StoredEntry {
            value: value.to_string(),
            expires_at: Utc::now() + Duration::days(ttl_days),
            path: StorageScope::Root.path().map(str::to_string),
            secure: self.inner.policy.secure,
            same_site: self.inner.policy.same_site(),
        }
    }

    fn read_unlocked(&self, kind: TokenKind) -> Option<String> {
        let now = Utc::now();
        for scope in StorageScope::ALL {
            let key = EntryKey::new(kind, scope);
            match self.inner.platform.retrieve(&key) {
                Ok(Some(entry)) if !entry.is_expired(now) => return Some(entry.value),
                Ok(Some(_)) => {
                    debug!(key = %key, "Evicting expired entry");
                    if let Err(e) = self.inner.platform.remove(&key) {
                        warn!(key = %key, error = %e, "Failed to evict expired entry");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, backend = self.inner.platform.name(), "Failed to read token");
                }
            }
        }
        None
    }

    /// Attempts every removal and reports the first failure. After a failure
    /// the entries that were removed are written back, so the store keeps the
    /// whole previous session rather than a lone token.
    fn remove_all_unlocked(&self) -> Result<(), StoreError> {
        let mut removed = Vec::new();
        let mut first_error = None;
        for kind in TokenKind::ALL {
            for scope in StorageScope::ALL {
                let key = EntryKey::new(kind, scope);
                let previous = self.inner.platform.retrieve(&key).ok().flatten();
                match self.inner.platform.remove(&key) {
                    Ok(()) => removed.extend(previous.map(|entry| (key, entry))),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to remove token");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        let Some(error) = first_error else {
            return Ok(());
        };
        for (key, entry) in removed {
            if let Err(e) = self.inner.platform.persist(&key, &entry) {
                warn!(key = %key, error = %e, "Failed to restore token after partial removal");
            }
        }
        Err(error)
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("backend", &self.inner.platform.name())
            .field("policy", &self.inner.policy)
            .finish()
    }
}
