//! Session termination: clear credentials, send the user to sign in again.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use super::store::TokenStore;

/// Why a session ended. Carried to the login page so it can tell the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum TerminationReason {
    SessionExpired,
    TokenRefreshFailed,
    NoSession,
    LoggedOut,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::SessionExpired => "session_expired",
            TerminationReason::TokenRefreshFailed => "token_refresh_failed",
            TerminationReason::NoSession => "no_session",
            TerminationReason::LoggedOut => "logged_out",
        }
    }

    /// Value for the login page's `reason` parameter. A deliberate logout
    /// needs no explanation.
    fn query_value(&self) -> Option<&'static str> {
        match self {
            TerminationReason::LoggedOut => None,
            other => Some(other.as_str()),
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionTerminator {
    store: TokenStore,
    login_url: Url,
}

impl SessionTerminator {
    pub fn new(store: TokenStore, login_url: Url) -> Self {
        Self { store, login_url }
    }

    /// Clear stored credentials and navigate to the login entry point.
    pub fn terminate(&self, reason: TerminationReason) {
        info!(reason = %reason, "Ending session");
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear tokens while ending session");
        }
        self.store.platform().navigate(&self.location(reason));
    }

    /// Where [`terminate`](Self::terminate) navigates for `reason`.
    pub fn location(&self, reason: TerminationReason) -> Url {
        let mut url = self.login_url.clone();
        if let Some(value) = reason.query_value() {
            url.query_pairs_mut().append_pair("reason", value);
        }
        url
    }
}
