//! Data models shared by API consumers.

use serde::{Deserialize, Serialize};

use crate::auth::TokenPair;

/// The signed-in user as reported by the session check endpoint.
///
/// Only the fields the session layer cares about are typed; the rest of the
/// profile is kept as-is for feature modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CurrentUser {
    pub fn display_name(&self) -> String {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.to_string(),
            (None, Some(last)) => last.to_string(),
            (None, None) => self.email.clone().unwrap_or_else(|| "unknown user".to_string()),
        }
    }
}

/// Result of a password sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Tokens were issued and stored.
    Signed(TokenPair),
    /// A code was sent to the user; finish with `ApiClient::verify_two_factor`.
    TwoFactorRequired {
        user_id: String,
        message: Option<String>,
    },
    /// The email address must be verified before signing in.
    VerificationRequired {
        user_id: String,
        message: Option<String>,
    },
}

/// The token-less part of a login response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginChallenge {
    #[serde(default)]
    pub requires_verification: bool,
    #[serde(default, rename = "requires2FA")]
    pub requires_two_factor: bool,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl LoginChallenge {
    /// The user id as text; the backend sends it as a number.
    pub fn user_id(&self) -> Option<String> {
        match self.user_id.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionCheckResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub user: Option<CurrentUser>,
}
