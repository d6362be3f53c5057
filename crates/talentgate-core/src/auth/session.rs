use std::fmt;
use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::platform::{Platform, StoreError, TokenKind};
use super::refresh::{RefreshCoordinator, RefreshError, REFRESH_PATH};
use super::store::TokenStore;
use super::terminator::{SessionTerminator, TerminationReason};
use super::token;
use crate::config::Config;

/// An access/refresh credential pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Token-bearing response body. The backend has shipped the access token as
/// both `accessToken` and `token`, at the top level and under `data`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenEnvelope {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    data: Option<Box<TokenEnvelope>>,
}

impl TokenEnvelope {
    fn access(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .or(self.token.as_deref())
            .filter(|s| !s.is_empty())
    }

    fn refresh(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|s| !s.is_empty())
    }

    /// Both tokens, or `None` if either is missing.
    pub(crate) fn into_pair(self) -> Option<TokenPair> {
        let nested = self.data.as_deref();
        let access = nested.and_then(TokenEnvelope::access).or(self.access())?;
        let refresh = nested.and_then(TokenEnvelope::refresh).or(self.refresh())?;
        Some(TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        })
    }
}

/// The signed-in session: owns the token store, the refresh coordinator and
/// the terminator, and is shared by every request through an `Arc`.
pub struct Session {
    store: TokenStore,
    refresher: RefreshCoordinator,
    terminator: SessionTerminator,
}

impl Session {
    pub fn new(config: &Config, platform: Arc<dyn Platform>, client: Client) -> Self {
        let store = TokenStore::new(platform, config.deployment());
        let refresher = RefreshCoordinator::new(client, config.endpoint(REFRESH_PATH), store.clone());
        let terminator = SessionTerminator::new(store.clone(), config.login_url.clone());
        debug!(backend = store.platform().name(), deployment = ?config.deployment(), "Session created");
        Self {
            store,
            refresher,
            terminator,
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.get(TokenKind::Access)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.store.get(TokenKind::Refresh)
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.store.pair()
    }

    pub fn set_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), StoreError> {
        self.store.set(access_token, refresh_token)
    }

    pub fn clear_tokens(&self) -> Result<(), StoreError> {
        self.store.clear()
    }

    pub fn is_token_expired(&self, token: Option<&str>) -> bool {
        token::is_expired(token)
    }

    /// True when an access token is stored and not about to expire.
    pub fn is_authenticated(&self) -> bool {
        !token::is_expired(self.access_token().as_deref())
    }

    /// Exchange the stored refresh token for a new pair.
    pub async fn refresh(&self) -> Result<TokenPair, RefreshError> {
        let refresh_token = self.refresh_token().ok_or(RefreshError::MissingToken)?;
        self.refresher.refresh(&refresh_token).await
    }

    /// A usable access token to replace `stale`.
    ///
    /// If another request chain already replaced `stale` with a live token,
    /// that one is reused instead of refreshing again.
    pub async fn renew(&self, stale: Option<&str>) -> Result<String, RefreshError> {
        if let Some(current) = self.access_token() {
            if Some(current.as_str()) != stale && !token::is_expired(Some(&current)) {
                debug!("Access token already renewed by another request");
                return Ok(current);
            }
        }
        self.refresh().await.map(|pair| pair.access_token)
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresher.is_refreshing()
    }

    /// Clear the session and navigate to the login entry point.
    pub fn terminate(&self, reason: TerminationReason) {
        self.terminator.terminate(reason);
    }

    pub fn terminator(&self) -> &SessionTerminator {
        &self.terminator
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store)
            .field("refresher", &self.refresher)
            .finish()
    }
}
