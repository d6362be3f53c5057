//! API client for the talentgate backend.
//!
//! Every feature module calls the backend through [`ApiClient::send`] (or the
//! typed helpers built on it). The client attaches the session's bearer token,
//! and when the server answers 401 it either ends the session or refreshes the
//! token and retries the request exactly once.

use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::error::{classify_unauthorized, ApiError, AuthFailure, ErrorBody};
use crate::auth::session::TokenEnvelope;
use crate::auth::{token, Platform, RefreshError, Session, TerminationReason, TokenPair};
use crate::config::Config;
use crate::models::{CurrentUser, LoginChallenge, LoginOutcome, SessionCheckResponse};

// ============================================================================
// Constants
// ============================================================================

/// Correlation header sent with every request; kept across the retry.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const REQUEST_ID_LENGTH: usize = 8;

const LOGIN_PATH: &str = "/auth/login";
const VERIFY_TWO_FACTOR_PATH: &str = "/auth/verify-2fa";
const LOGOUT_PATH: &str = "/auth/logout";
const LOGOUT_ALL_PATH: &str = "/auth/logout-all";
const SESSION_CHECK_PATH: &str = "/auth/check";

fn request_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LENGTH)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// A backend call, kept as data so it can be replayed after a refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<serde_json::Value>,
    require_fresh_token: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            require_fresh_token: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header. `Authorization` is owned by the client and ignored here.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if name == header::AUTHORIZATION {
            warn!(path = %self.path, "Ignoring caller-supplied Authorization header");
            return self;
        }
        self.headers.insert(name, value);
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Refresh before sending if the stored access token is already expired
    /// locally, instead of waiting for the server's 401.
    pub fn require_fresh_token(mut self) -> Self {
        self.require_fresh_token = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// API client for the talentgate backend.
/// Clone is cheap - the HTTP client, config and session are all shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: Arc<Config>,
    session: Arc<Session>,
}

impl ApiClient {
    /// Create a client and a session persisted through `platform`.
    pub fn new(config: Config, platform: Arc<dyn Platform>) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let session = Arc::new(Session::new(&config, platform, client.clone()));
        Ok(Self::with_session(config, client, session))
    }

    /// Create a client around an existing session, sharing its connection pool.
    pub fn with_session(config: Config, client: Client, session: Arc<Session>) -> Self {
        Self {
            client,
            config: Arc::new(config),
            session,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ===== Request pipeline =====

    /// Send `request` with the session's credentials.
    ///
    /// Responses other than 401 come back unchanged, whatever their status. A
    /// 401 either ends the session (and returns the matching error) or is
    /// retried once with a refreshed token; the retry's response is final.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let request_id = request_id();
        let mut token = self.session.access_token();

        if request.require_fresh_token
            && token::is_expired(token.as_deref())
            && self.session.refresh_token().is_some()
        {
            debug!(path = %request.path, request_id = %request_id, "Access token expired locally, refreshing before send");
            let renewed = self.session.renew(token.as_deref()).await;
            match renewed {
                Ok(fresh) => token = Some(fresh),
                Err(e) => return Err(self.refresh_failed(e)),
            }
        }

        let response = self.dispatch(&request, token.as_deref(), &request_id).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        self.recover(&request, response, token.as_deref(), &request_id)
            .await
    }

    /// Handle a first-attempt 401.
    async fn recover(
        &self,
        request: &ApiRequest,
        response: Response,
        sent_with: Option<&str>,
        request_id: &str,
    ) -> Result<Response, ApiError> {
        let body = response.text().await.unwrap_or_default();
        let error = ErrorBody::parse(&body);

        if classify_unauthorized(&error) == AuthFailure::InvalidSession {
            let message = error.message.unwrap_or_else(|| "Session expired".to_string());
            warn!(path = %request.path, request_id = %request_id, message = %message, "Server rejected the session");
            self.session.terminate(TerminationReason::SessionExpired);
            return Err(ApiError::InvalidSession(message));
        }

        if self.session.refresh_token().is_none() {
            warn!(path = %request.path, request_id = %request_id, "Unauthorized and no refresh token available");
            self.session.terminate(TerminationReason::NoSession);
            return Err(ApiError::NoSession);
        }

        let fresh = match self.session.renew(sent_with).await {
            Ok(fresh) => fresh,
            Err(e) => return Err(self.refresh_failed(e)),
        };

        debug!(path = %request.path, request_id = %request_id, "Retrying with refreshed token");
        self.dispatch(request, Some(&fresh), request_id).await
    }

    fn refresh_failed(&self, error: RefreshError) -> ApiError {
        self.session.terminate(TerminationReason::TokenRefreshFailed);
        ApiError::RefreshFailed(error)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
        request_id: &str,
    ) -> Result<Response, ApiError> {
        let url = self.config.endpoint(&request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .header(REQUEST_ID_HEADER, request_id);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        debug!(
            method = %request.method,
            path = %request.path,
            request_id = %request_id,
            authenticated = token.is_some(),
            "Sending request"
        );
        Ok(builder.send().await?)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })
    }

    /// Send `request` and decode a successful JSON response.
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path.clone();
        let response = self.send(request).await?;
        let response = Self::check_response(response).await?;
        Self::parse_json(response, &path).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.fetch(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.fetch(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.fetch(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.fetch(ApiRequest::patch(path).json(body)?).await
    }

    /// DELETE `path`, discarding any response body.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let response = self.send(ApiRequest::delete(path)).await?;
        Self::check_response(response).await?;
        Ok(())
    }

    // ===== Session lifecycle =====

    /// Sign in with a password.
    ///
    /// Bypasses the refresh pipeline: a 401 here means bad credentials.
    /// Accounts with two-factor sign-in or an unverified email get no tokens
    /// yet; the outcome says which step comes next.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, ApiError> {
        let response = self
            .client
            .post(self.config.endpoint(LOGIN_PATH))
            .header(REQUEST_ID_HEADER, request_id())
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let value: Option<serde_json::Value> = serde_json::from_str(&body).ok();
        let challenge: LoginChallenge = value
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        // unverified accounts are refused with 403 but still name the user
        if status == StatusCode::FORBIDDEN && challenge.requires_verification {
            return Self::challenge_outcome(challenge);
        }
        if !status.is_success() {
            return Err(ApiError::from_status(status, &body));
        }
        if challenge.requires_verification || challenge.requires_two_factor {
            return Self::challenge_outcome(challenge);
        }

        let value = value.ok_or_else(|| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}", LOGIN_PATH))
        })?;
        let pair = self.store_issued(value, LOGIN_PATH)?;
        info!("Login successful");
        Ok(LoginOutcome::Signed(pair))
    }

    /// Finish a two-factor sign-in with the emailed code and store the pair.
    pub async fn verify_two_factor(&self, user_id: &str, code: &str) -> Result<TokenPair, ApiError> {
        let response = self
            .client
            .post(self.config.endpoint(VERIFY_TWO_FACTOR_PATH))
            .header(REQUEST_ID_HEADER, request_id())
            .json(&serde_json::json!({ "userId": user_id, "code": code.trim() }))
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let value: serde_json::Value = Self::parse_json(response, VERIFY_TWO_FACTOR_PATH).await?;
        let pair = self.store_issued(value, VERIFY_TWO_FACTOR_PATH)?;
        info!("Two-factor sign-in complete");
        Ok(pair)
    }

    fn challenge_outcome(challenge: LoginChallenge) -> Result<LoginOutcome, ApiError> {
        let user_id = challenge.user_id().ok_or_else(|| {
            ApiError::InvalidResponse("Login challenge did not include a user id".to_string())
        })?;
        let message = challenge.message;
        if challenge.requires_verification {
            debug!(user_id = %user_id, "Login requires email verification");
            Ok(LoginOutcome::VerificationRequired { user_id, message })
        } else {
            debug!(user_id = %user_id, "Login requires a two-factor code");
            Ok(LoginOutcome::TwoFactorRequired { user_id, message })
        }
    }

    /// Pull the issued pair out of a sign-in response and store it.
    fn store_issued(&self, body: serde_json::Value, path: &str) -> Result<TokenPair, ApiError> {
        let envelope: TokenEnvelope = serde_json::from_value(body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })?;
        let pair = envelope.into_pair().ok_or_else(|| {
            ApiError::InvalidResponse(format!("Response from {} did not include both tokens", path))
        })?;
        self.session
            .set_tokens(&pair.access_token, &pair.refresh_token)?;
        Ok(pair)
    }

    /// Sign out on the server (this device, or `everywhere`) and end the
    /// local session. Local tokens are cleared even if the server call fails;
    /// that failure is still reported.
    pub async fn logout(&self, everywhere: bool) -> Result<(), ApiError> {
        let path = if everywhere { LOGOUT_ALL_PATH } else { LOGOUT_PATH };
        let mut result = Ok(());

        if let Some(token) = self.session.access_token() {
            let outcome = self
                .client
                .post(self.config.endpoint(path))
                .bearer_auth(&token)
                .header(REQUEST_ID_HEADER, request_id())
                .send()
                .await;
            result = match outcome {
                Ok(response) => Self::check_response(response).await.map(|_| ()),
                Err(e) => Err(e.into()),
            };
            if let Err(ref e) = result {
                warn!(error = %e, everywhere, "Logout request failed, clearing local session anyway");
            }
        }

        self.session.terminate(TerminationReason::LoggedOut);
        result
    }

    /// Ask the server who is signed in.
    ///
    /// `Ok(None)` means there is no usable session (and any stale tokens have
    /// been cleared). Server and network failures keep the tokens and return
    /// an error, since the session may well still be valid.
    pub async fn check_session(&self) -> Result<Option<CurrentUser>, ApiError> {
        let Some(mut token) = self.session.access_token() else {
            return Ok(None);
        };

        if token::is_expired(Some(&token)) {
            let renewed = self.session.renew(Some(&token)).await;
            match renewed {
                Ok(fresh) => token = fresh,
                Err(e) => {
                    debug!(error = %e, "Stored access token expired and could not be renewed");
                    self.session.clear_tokens()?;
                    return Ok(None);
                }
            }
        }

        let request = ApiRequest::get(SESSION_CHECK_PATH);
        let response = self.dispatch(&request, Some(&token), &request_id()).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Session check rejected, clearing tokens");
            self.session.clear_tokens()?;
            return Ok(None);
        }

        let response = Self::check_response(response).await?;
        let check: SessionCheckResponse = Self::parse_json(response, SESSION_CHECK_PATH).await?;
        match check.user {
            Some(user) if check.success => Ok(Some(user)),
            _ => {
                debug!("Session check returned no user, clearing tokens");
                self.session.clear_tokens()?;
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.api_base_url)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_shape() {
        let id = request_id();
        assert_eq!(id.len(), REQUEST_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(request_id(), request_id());
    }

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::post("/onboarding/tasks")
            .query("page", "2")
            .header(
                HeaderName::from_static("x-client"),
                HeaderValue::from_static("cli"),
            )
            .header(header::AUTHORIZATION, HeaderValue::from_static("Bearer forged"))
            .json(&serde_json::json!({ "title": "Sign NDA" }))
            .unwrap()
            .require_fresh_token();

        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.path(), "/onboarding/tasks");
        assert_eq!(request.query, vec![("page".to_string(), "2".to_string())]);
        assert!(request.headers.get(header::AUTHORIZATION).is_none());
        assert_eq!(request.headers.get("x-client").unwrap(), "cli");
        assert!(request.require_fresh_token);
        assert_eq!(request.body, Some(serde_json::json!({ "title": "Sign NDA" })));
    }
}
