//! Integration tests for the authenticated request pipeline using wiremock.
//!
//! Each test runs the real `ApiClient` against a mock backend with an
//! in-memory platform, so stored tokens and navigations can be inspected.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use talentgate_core::auth::{
    EntryKey, MemoryPlatform, RefreshError, SameSite, StorageScope, StoredEntry, TokenKind,
};
use talentgate_core::{ApiClient, ApiError, ApiRequest, Config, LoginOutcome, TokenPair};

/// Build a JWT-shaped token expiring `offset_secs` from now.
fn jwt(offset_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({ "exp": Utc::now().timestamp() + offset_secs, "sub": "42", "role": "hr" })
            .to_string(),
    );
    format!("{}.{}.signature", header, payload)
}

async fn setup() -> (MockServer, ApiClient, MemoryPlatform) {
    let server = MockServer::start().await;
    let platform = MemoryPlatform::new();
    let config = Config::new(&server.uri()).unwrap();
    let client = ApiClient::new(config, Arc::new(platform.clone())).unwrap();
    (server, client, platform)
}

fn pair(access: &str, refresh: &str) -> TokenPair {
    TokenPair {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
    }
}

fn unauthorized(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({ "success": false, "message": message }))
}

async fn mount_refresh(server: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

fn reasons(platform: &MemoryPlatform) -> Vec<Option<String>> {
    platform
        .navigations()
        .iter()
        .map(|url| {
            assert_eq!(url.path(), "/auth/login");
            url.query().map(str::to_string)
        })
        .collect()
}

#[tokio::test]
async fn test_authorized_request_passes_through() {
    let (server, client, platform) = setup().await;
    let token = jwt(3600);
    client.session().set_tokens(&token, "refresh-1").unwrap();

    Mock::given(method("GET"))
        .and(path("/onboarding/tasks"))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .and(header_exists("x-request-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tasks": [1, 2] })))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(200), 0).await;

    let body: serde_json::Value = client.get("/onboarding/tasks").await.unwrap();
    assert_eq!(body["tasks"], json!([1, 2]));
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_refreshes_without_access_token() {
    let (server, client, platform) = setup().await;
    // only a refresh token survived
    platform.insert(
        EntryKey::new(TokenKind::Refresh, StorageScope::Root),
        StoredEntry {
            value: "refresh-1".to_string(),
            expires_at: Utc::now() + chrono::Duration::days(30),
            path: Some("/".to_string()),
            secure: false,
            same_site: SameSite::Lax,
        },
    );
    assert!(client.session().access_token().is_none());

    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "new", "refreshToken": "new2" })),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(unauthorized("Access token required"))
        .expect(1)
        .mount(&server)
        .await;

    let response = client.send(ApiRequest::get("/profile")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(client.session().tokens(), Some(pair("new", "new2")));
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_no_credentials_ends_session() {
    let (server, client, platform) = setup().await;

    mount_refresh(&server, ResponseTemplate::new(200), 0).await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(unauthorized("Access token required"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.send(ApiRequest::get("/profile")).await;
    assert!(matches!(result, Err(ApiError::NoSession)));
    assert_eq!(reasons(&platform), vec![Some("reason=no_session".to_string())]);
}

#[tokio::test]
async fn test_invalid_session_skips_refresh() {
    let (server, client, platform) = setup().await;
    client.session().set_tokens(&jwt(3600), "refresh-1").unwrap();

    mount_refresh(&server, ResponseTemplate::new(200), 0).await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(unauthorized("Session expired"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.send(ApiRequest::get("/profile")).await;
    assert!(matches!(result, Err(ApiError::InvalidSession(ref m)) if m == "Session expired"));
    assert!(client.session().tokens().is_none());
    assert_eq!(reasons(&platform), vec![Some("reason=session_expired".to_string())]);
}

#[tokio::test]
async fn test_structured_code_skips_refresh() {
    let (server, client, platform) = setup().await;
    client.session().set_tokens(&jwt(3600), "refresh-1").unwrap();

    mount_refresh(&server, ResponseTemplate::new(200), 0).await;
    Mock::given(method("DELETE"))
        .and(path("/documents/7"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({ "message": "Please sign in", "code": "SESSION_REVOKED" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = client.delete("/documents/7").await;
    assert!(matches!(result, Err(ApiError::InvalidSession(_))));
    assert_eq!(reasons(&platform), vec![Some("reason=session_expired".to_string())]);
}

#[tokio::test]
async fn test_retry_happens_once() {
    let (server, client, platform) = setup().await;
    let fresh = jwt(3600);
    client.session().set_tokens("old", "refresh-1").unwrap();

    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "accessToken": fresh, "refreshToken": "refresh-2" })),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "Bearer old"))
        .respond_with(unauthorized("Access token required"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", format!("Bearer {}", fresh).as_str()))
        .respond_with(unauthorized("Access token required"))
        .expect(1)
        .mount(&server)
        .await;

    // the retried 401 is handed back as-is
    let response = client.send(ApiRequest::get("/profile")).await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(client.session().tokens(), Some(pair(&fresh, "refresh-2")));
    assert!(platform.navigations().is_empty());

    // the retry reuses the first attempt's correlation id
    let requests = server.received_requests().await.unwrap();
    let ids: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path() == "/profile")
        .map(|r| r.headers.get("x-request-id").cloned())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids[0].is_some());
    assert_eq!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_refresh_failure_ends_session() {
    let (server, client, platform) = setup().await;
    client.session().set_tokens("old", "refresh-1").unwrap();

    mount_refresh(&server, unauthorized("Invalid refresh token"), 1).await;
    Mock::given(method("POST"))
        .and(path("/onboarding/tasks"))
        .respond_with(unauthorized("Access token required"))
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::post("/onboarding/tasks")
        .json(&json!({ "title": "Sign NDA" }))
        .unwrap();
    let result = client.send(request).await;
    assert!(matches!(
        result,
        Err(ApiError::RefreshFailed(RefreshError::Rejected { status: 401, ref message }))
            if message == "Invalid refresh token"
    ));
    assert!(client.session().tokens().is_none());
    assert_eq!(
        reasons(&platform),
        vec![Some("reason=token_refresh_failed".to_string())]
    );
}

#[tokio::test]
async fn test_malformed_refresh_response_ends_session() {
    let (server, client, platform) = setup().await;
    client.session().set_tokens("old", "refresh-1").unwrap();

    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "success": true, "accessToken": "a" })),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(unauthorized("Access token required"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.send(ApiRequest::get("/profile")).await;
    assert!(matches!(
        result,
        Err(ApiError::RefreshFailed(RefreshError::InvalidResponse(_)))
    ));
    assert_eq!(
        reasons(&platform),
        vec![Some("reason=token_refresh_failed".to_string())]
    );
}

#[tokio::test]
async fn test_other_errors_pass_through() {
    let (server, client, platform) = setup().await;
    client.session().set_tokens(&jwt(3600), "refresh-1").unwrap();

    mount_refresh(&server, ResponseTemplate::new(200), 0).await;
    Mock::given(method("GET"))
        .and(path("/reports"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "db down" })))
        .expect(2)
        .mount(&server)
        .await;

    let response = client.send(ApiRequest::get("/reports")).await.unwrap();
    assert_eq!(response.status(), 500);

    let result: Result<serde_json::Value, _> = client.get("/reports").await;
    assert!(matches!(result, Err(ApiError::ServerError(ref m)) if m == "db down"));
    assert!(client.session().tokens().is_some());
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_concurrent_unauthorized_share_one_refresh() {
    let (server, client, platform) = setup().await;
    let fresh = jwt(3600);
    client.session().set_tokens("old", "refresh-1").unwrap();

    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "accessToken": fresh, "refreshToken": "refresh-2" }))
            .set_delay(Duration::from_millis(200)),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "Bearer old"))
        .respond_with(unauthorized("Access token required"))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", format!("Bearer {}", fresh).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(5)
        .mount(&server)
        .await;

    let requests = (0..5).map(|_| {
        let client = client.clone();
        async move { client.send(ApiRequest::get("/profile")).await }
    });
    let responses = futures::future::join_all(requests).await;

    for response in responses {
        assert_eq!(response.unwrap().status(), 200);
    }
    assert_eq!(client.session().tokens(), Some(pair(&fresh, "refresh-2")));
    assert!(!client.session().is_refreshing());
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_refresh_survives_cancelled_caller() {
    let (server, client, platform) = setup().await;
    let fresh = jwt(3600);
    client.session().set_tokens("old", "refresh-1").unwrap();

    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "accessToken": fresh, "refreshToken": "refresh-2" }))
            .set_delay(Duration::from_millis(300)),
        1,
    )
    .await;

    let cancelled = tokio::time::timeout(Duration::from_millis(50), client.session().refresh()).await;
    assert!(cancelled.is_err());
    assert!(client.session().is_refreshing());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!client.session().is_refreshing());
    assert_eq!(client.session().tokens(), Some(pair(&fresh, "refresh-2")));

    // later callers reuse the stored token instead of waiting on a dead exchange
    let renewed = client.session().renew(Some("old")).await.unwrap();
    assert_eq!(renewed, fresh);
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_refresh_accepts_token_alias() {
    let (server, client, _platform) = setup().await;
    let fresh = jwt(3600);
    client.session().set_tokens("old", "refresh-1").unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .and(body_json(json!({ "refreshToken": "refresh-1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": true, "token": fresh, "refreshToken": "refresh-2" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let refreshed = client.session().refresh().await.unwrap();
    assert_eq!(refreshed, pair(&fresh, "refresh-2"));
    assert_eq!(client.session().tokens(), Some(refreshed));
}

#[tokio::test]
async fn test_require_fresh_token_refreshes_first() {
    let (server, client, platform) = setup().await;
    let fresh = jwt(3600);
    // inside the 30 second buffer
    client.session().set_tokens(&jwt(10), "refresh-1").unwrap();
    assert!(!client.session().is_authenticated());

    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "accessToken": fresh, "refreshToken": "refresh-2" })),
        1,
    )
    .await;
    Mock::given(method("PUT"))
        .and(path("/employees/42/salary"))
        .and(header("authorization", format!("Bearer {}", fresh).as_str()))
        .and(body_json(json!({ "amount": 90000 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "updated": true })))
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::put("/employees/42/salary")
        .json(&json!({ "amount": 90000 }))
        .unwrap()
        .require_fresh_token();
    let body: serde_json::Value = client.fetch(request).await.unwrap();
    assert_eq!(body["updated"], json!(true));
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_login_stores_pair() {
    let (server, client, platform) = setup().await;
    let access = jwt(3600);

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({ "email": "dana@example.com", "password": "hunter2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "accessToken": access, "refreshToken": "refresh-1", "user": { "id": 42 } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client.login("dana@example.com", "hunter2").await.unwrap();
    assert_eq!(outcome, LoginOutcome::Signed(pair(&access, "refresh-1")));
    assert_eq!(client.session().tokens(), Some(pair(&access, "refresh-1")));
    assert!(client.session().is_authenticated());
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_login_bad_credentials() {
    let (server, client, platform) = setup().await;

    mount_refresh(&server, ResponseTemplate::new(200), 0).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(unauthorized("Invalid credentials"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.login("dana@example.com", "wrong").await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert!(client.session().tokens().is_none());
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_login_two_factor_then_verify() {
    let (server, client, platform) = setup().await;
    let access = jwt(3600);

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "requires2FA": true,
            "userId": 42,
            "message": "Verification code sent to your email"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/verify-2fa"))
        .and(body_json(json!({ "userId": "42", "code": "123456" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "token": access,
            "refreshToken": "refresh-1",
            "user": { "id": 42 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client.login("dana@example.com", "hunter2").await.unwrap();
    assert_eq!(
        outcome,
        LoginOutcome::TwoFactorRequired {
            user_id: "42".to_string(),
            message: Some("Verification code sent to your email".to_string()),
        }
    );
    assert!(client.session().tokens().is_none());

    let issued = client.verify_two_factor("42", "123456\n").await.unwrap();
    assert_eq!(issued, pair(&access, "refresh-1"));
    assert_eq!(client.session().tokens(), Some(issued));
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_verify_two_factor_wrong_code() {
    let (server, client, platform) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/verify-2fa"))
        .respond_with(unauthorized("Invalid verification code"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.verify_two_factor("42", "000000").await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert!(client.session().tokens().is_none());
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_login_unverified_account() {
    let (server, client, platform) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "success": false,
            "requiresVerification": true,
            "userId": 7,
            "message": "Please verify your email"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client.login("new@example.com", "hunter2").await.unwrap();
    assert_eq!(
        outcome,
        LoginOutcome::VerificationRequired {
            user_id: "7".to_string(),
            message: Some("Please verify your email".to_string()),
        }
    );
    assert!(client.session().tokens().is_none());
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_login_forbidden_without_challenge() {
    let (server, client, _platform) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({ "success": false, "message": "Account disabled" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = client.login("dana@example.com", "hunter2").await;
    assert!(matches!(result, Err(ApiError::AccessDenied(ref m)) if m == "Account disabled"));
    assert!(client.session().tokens().is_none());
}

#[tokio::test]
async fn test_logout_clears_and_navigates() {
    let (server, client, platform) = setup().await;
    let token = jwt(3600);
    client.session().set_tokens(&token, "refresh-1").unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    client.logout(false).await.unwrap();
    assert!(client.session().tokens().is_none());
    assert!(platform.is_empty());
    assert_eq!(reasons(&platform), vec![None]);
}

#[tokio::test]
async fn test_logout_everywhere_clears_on_server_error() {
    let (server, client, platform) = setup().await;
    client.session().set_tokens(&jwt(3600), "refresh-1").unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/logout-all"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.logout(true).await;
    assert!(matches!(result, Err(ApiError::ServerError(_))));
    assert!(client.session().tokens().is_none());
    assert_eq!(reasons(&platform), vec![None]);
}

#[tokio::test]
async fn test_check_session_returns_user() {
    let (server, client, _platform) = setup().await;
    client.session().set_tokens(&jwt(3600), "refresh-1").unwrap();

    Mock::given(method("GET"))
        .and(path("/auth/check"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "user": { "id": 42, "email": "dana@example.com", "firstName": "Dana", "lastName": "Reyes" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user = client.check_session().await.unwrap().unwrap();
    assert_eq!(user.display_name(), "Dana Reyes");
    assert!(client.session().tokens().is_some());
}

#[tokio::test]
async fn test_check_session_rejected_clears_tokens() {
    let (server, client, platform) = setup().await;
    client.session().set_tokens(&jwt(3600), "refresh-1").unwrap();

    Mock::given(method("GET"))
        .and(path("/auth/check"))
        .respond_with(unauthorized("Invalid token"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.check_session().await.unwrap().is_none());
    assert!(client.session().tokens().is_none());
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_check_session_renews_expired_token() {
    let (server, client, platform) = setup().await;
    client.session().set_tokens(&jwt(-60), "refresh-1").unwrap();

    mount_refresh(&server, unauthorized("Refresh token expired"), 1).await;
    Mock::given(method("GET"))
        .and(path("/auth/check"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    assert!(client.check_session().await.unwrap().is_none());
    assert!(client.session().tokens().is_none());
    assert!(platform.navigations().is_empty());
}

#[tokio::test]
async fn test_check_session_keeps_tokens_on_server_error() {
    let (server, client, _platform) = setup().await;
    client.session().set_tokens(&jwt(3600), "refresh-1").unwrap();

    Mock::given(method("GET"))
        .and(path("/auth/check"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    assert!(matches!(
        client.check_session().await,
        Err(ApiError::ServerError(_))
    ));
    assert!(client.session().tokens().is_some());
}

#[tokio::test]
async fn test_check_session_without_tokens() {
    let (_server, client, _platform) = setup().await;
    assert!(client.check_session().await.unwrap().is_none());
}
