use crate::{api, rate_limiter, AuthState, ListingSource, RedditClient, RedditOAuth2Config, RedditToken};
use mintwatch_core::{CoreError, Credentials, Item, ItemKind, RedditApiError, ReplySink};
use serde_json::json;
use std::time::{Duration, SystemTime};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_config() -> RedditOAuth2Config {
    RedditOAuth2Config::new(
        "test_client_id".to_string(),
        "test_client_secret".to_string(),
        "http://localhost:8080/callback".to_string(),
        "mintwatch/1.0 by test_user".to_string(),
    )
}

fn mock_config(server: &MockServer) -> RedditOAuth2Config {
    create_test_config().with_endpoints(
        format!("{}/api/v1/access_token", server.uri()),
        server.uri(),
    )
}

fn token_expiring_in(seconds: i64) -> RedditToken {
    let now = SystemTime::now();
    let expires_at = if seconds >= 0 {
        now + Duration::from_secs(seconds as u64)
    } else {
        now - Duration::from_secs(seconds.unsigned_abs())
    };
    RedditToken {
        access_token: "access".to_string(),
        refresh_token: Some("refresh".to_string()),
        expires_at,
        scope: vec!["identity".to_string(), "read".to_string(), "submit".to_string()],
    }
}

async fn mount_token_endpoint(server: &MockServer, grant: &str, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .and(body_string_contains(format!("grant_type={}", grant)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": 86400,
            "scope": "identity read submit"
        })))
        .mount(server)
        .await;
}

#[test]
fn test_config_creation() {
    let config = create_test_config();
    assert_eq!(config.client_id, "test_client_id");
    assert_eq!(config.client_secret, "test_client_secret");
    assert_eq!(config.redirect_uri, "http://localhost:8080/callback");
    assert_eq!(config.user_agent, "mintwatch/1.0 by test_user");
    assert_eq!(config.token_url, crate::REDDIT_TOKEN_URL);
    assert_eq!(config.api_base, api::REDDIT_API_BASE);
}

#[test]
fn test_client_creation() {
    let client = RedditClient::new(create_test_config()).unwrap();
    assert!(!client.is_authenticated());
    assert!(!client.needs_refresh());
    assert!(matches!(client.get_auth_state(), AuthState::NotAuthenticated));
}

#[test]
fn test_invalid_redirect_uri_rejected() {
    let mut config = create_test_config();
    config.redirect_uri = "not a url".to_string();
    assert!(matches!(
        RedditClient::new(config),
        Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed { .. }))
    ));
}

#[test]
fn test_auth_url_generation() {
    let client = RedditClient::new(create_test_config()).unwrap();

    let scopes = RedditClient::get_required_scopes();
    let (auth_url, csrf_token) = client.generate_auth_url(&scopes).unwrap();
    assert!(auth_url.starts_with("https://www.reddit.com/api/v1/authorize"));
    assert!(auth_url.contains("client_id=test_client_id"));
    assert!(auth_url.contains("redirect_uri="));
    assert!(auth_url.contains("scope=identity+read+submit"));
    assert!(auth_url.contains("duration=permanent"));
    assert!(!csrf_token.secret().is_empty());

    match client.get_auth_state() {
        AuthState::PendingAuthorization { csrf_state } => {
            assert_eq!(&csrf_state, csrf_token.secret())
        }
        other => panic!("expected pending authorization, got {other:?}"),
    }
}

#[test]
fn test_required_scopes() {
    assert_eq!(
        RedditClient::get_required_scopes(),
        vec!["identity", "read", "submit"]
    );
}

#[test]
fn test_token_expiry_states() {
    let client = RedditClient::new(create_test_config()).unwrap();

    client.set_token(token_expiring_in(3600));
    assert!(client.is_authenticated());
    assert!(!client.needs_refresh());

    // inside the refresh margin but not yet expired
    client.set_token(token_expiring_in(30));
    assert!(client.is_authenticated());
    assert!(client.needs_refresh());

    client.set_token(token_expiring_in(-3600));
    assert!(!client.is_authenticated());
    assert!(client.needs_refresh());
    assert!(matches!(client.get_auth_state(), AuthState::TokenExpired { .. }));
}

#[test]
fn test_callback_url_parsing_errors() {
    let client = RedditClient::new(create_test_config()).unwrap();
    let scopes = RedditClient::get_required_scopes();
    let (_, csrf_token) = client.generate_auth_url(&scopes).unwrap();

    let result = tokio_test::block_on(client.handle_callback("not_a_url", &csrf_token));
    assert!(result.is_err());

    let error_callback = "http://localhost:8080/callback?error=access_denied&state=test";
    match tokio_test::block_on(client.handle_callback(error_callback, &csrf_token)) {
        Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })) => {
            assert_eq!(reason, "access_denied")
        }
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }

    let no_state_callback = "http://localhost:8080/callback?code=test_code";
    assert!(tokio_test::block_on(client.handle_callback(no_state_callback, &csrf_token)).is_err());

    let wrong_state_callback = "http://localhost:8080/callback?code=test_code&state=wrong_state";
    match tokio_test::block_on(client.handle_callback(wrong_state_callback, &csrf_token)) {
        Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })) => {
            assert_eq!(reason, "CSRF token mismatch")
        }
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ensure_authenticated_states() {
    let client = RedditClient::new(create_test_config()).unwrap();

    match client.ensure_authenticated().await {
        Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })) => {
            assert!(reason.contains("Not authenticated"))
        }
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }

    let scopes = RedditClient::get_required_scopes();
    client.generate_auth_url(&scopes).unwrap();

    match client.ensure_authenticated().await {
        Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })) => {
            assert!(reason.contains("Authentication pending"))
        }
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }

    client.set_token(token_expiring_in(3600));
    assert_eq!(client.ensure_authenticated().await.unwrap(), "access");
}

#[test]
fn test_token_serialization() {
    let token = RedditToken {
        access_token: "test_access_token".to_string(),
        refresh_token: Some("test_refresh_token".to_string()),
        expires_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1640995200),
        scope: vec!["identity".to_string(), "submit".to_string()],
    };

    let serialized = serde_json::to_string(&token).unwrap();
    assert!(serialized.contains("test_access_token"));
    assert!(serialized.contains("test_refresh_token"));

    let deserialized: RedditToken = serde_json::from_str(&serialized).unwrap();
    assert_eq!(deserialized.access_token, token.access_token);
    assert_eq!(deserialized.refresh_token, token.refresh_token);
    assert_eq!(deserialized.scope, token.scope);
    assert_eq!(deserialized.expires_at, token.expires_at);
}

#[tokio::test]
async fn test_refresh_token_grant_keeps_refresh_token() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "refresh_token", "fresh-access").await;

    let client = RedditClient::new(mock_config(&server))
        .unwrap()
        .with_credentials(Credentials::RefreshToken("stored-refresh".to_string()));

    assert_eq!(client.ensure_authenticated().await.unwrap(), "fresh-access");
    match client.get_auth_state() {
        AuthState::Authenticated { token } => {
            assert_eq!(token.refresh_token.as_deref(), Some("stored-refresh"));
            assert_eq!(token.scope, vec!["identity", "read", "submit"]);
        }
        other => panic!("expected authenticated, got {other:?}"),
    }
}

#[tokio::test]
async fn test_expired_token_is_refreshed() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "refresh_token", "renewed").await;

    let client = RedditClient::new(mock_config(&server)).unwrap();
    client.set_token(token_expiring_in(-10));

    assert_eq!(client.ensure_authenticated().await.unwrap(), "renewed");
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_password_grant_authenticates() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "password", "password-access").await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me"))
        .and(header("authorization", "Bearer password-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "name": "mintwatch_bot",
            "created_utc": 1640995200.0
        })))
        .mount(&server)
        .await;

    let client = RedditClient::new(mock_config(&server))
        .unwrap()
        .with_credentials(Credentials::Password {
            username: "mintwatch_bot".to_string(),
            password: "hunter2".to_string(),
        });

    assert_eq!(
        client.authenticate().await.unwrap().as_deref(),
        Some("mintwatch_bot")
    );
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_application_only_grant_skips_account_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("scope=read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "app-access",
            "token_type": "bearer",
            "expires_in": 86400,
            "scope": "read"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me"))
        .respond_with(ResponseTemplate::new(403))
        .expect(0)
        .mount(&server)
        .await;

    let client = RedditClient::new(mock_config(&server))
        .unwrap()
        .with_credentials(Credentials::ApplicationOnly);

    assert_eq!(client.authenticate().await.unwrap(), None);
    assert_eq!(client.ensure_authenticated().await.unwrap(), "app-access");
    match client.get_auth_state() {
        AuthState::Authenticated { token } => {
            assert_eq!(token.refresh_token, None);
            assert_eq!(token.scope, vec!["read"]);
        }
        other => panic!("expected authenticated, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejected_grant_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    let client = RedditClient::new(mock_config(&server))
        .unwrap()
        .with_credentials(Credentials::RefreshToken("revoked".to_string()));

    let error = client.ensure_authenticated().await.unwrap_err();
    assert!(matches!(
        error,
        CoreError::RedditApi(RedditApiError::AuthenticationFailed { .. })
    ));
    assert!(mintwatch_core::ErrorExt::is_fatal(&error));
}

#[tokio::test]
async fn test_reply_uses_fullname() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/comment"))
        .and(header("authorization", "Bearer access"))
        .and(body_string_contains("thing_id=t1_c42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"json": {"errors": []}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = RedditClient::new(mock_config(&server)).unwrap();
    client.set_token(token_expiring_in(3600));

    let item = Item::comment("c42", "NFT", "who can mint my collection?");
    client.reply(&item, "happy to help").await.unwrap();
}

#[tokio::test]
async fn test_rejected_access_token_refreshes_once() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "refresh_token", "second").await;
    Mock::given(method("GET"))
        .and(path("/r/NFT/new"))
        .and(header("authorization", "Bearer access"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/NFT/new"))
        .and(header("authorization", "Bearer second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "Listing",
            "data": {"after": null, "before": null, "children": [
                {"kind": "t3", "data": {"id": "p1", "title": "need an nft artist", "selftext": "", "author": "alice", "subreddit": "NFT"}}
            ]}
        })))
        .mount(&server)
        .await;

    let client = RedditClient::new(mock_config(&server)).unwrap();
    client.set_token(token_expiring_in(3600));

    let items = client.fetch_newest(ItemKind::Post, "NFT").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].author_or_unknown(), "alice");
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_api_client_creation() {
    let client = api::RedditApiClient::new("test-user-agent/1.0".to_string()).unwrap();
    let status = client.get_rate_limit_status().await;
    assert!(status.available_tokens > 0);
    assert_eq!(client.user_agent(), "test-user-agent/1.0");
}

#[tokio::test]
async fn test_rate_limit_status_through_client() {
    let client = RedditClient::new(create_test_config()).unwrap();
    let status = client.get_rate_limit_status().await;
    assert_eq!(
        status.max_tokens,
        rate_limiter::RateLimitConfig::reddit_oauth().burst_allowance
    );
}
