pub mod api;
pub mod rate_limiter;
pub mod stream;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use mintwatch_core::{CoreError, Credentials, Item, ItemKind, RedditApiError, ReplySink};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, HttpRequest,
    HttpResponse, RedirectUrl, RefreshToken, RequestTokenError, ResourceOwnerPassword,
    ResourceOwnerUsername, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub use api::RedditApiClient;
pub use stream::{ListingSource, ListingStream};

pub const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Tokens are refreshed this long before Reddit would reject them.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct RedditOAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub user_agent: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl RedditOAuth2Config {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        user_agent: String,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            user_agent,
            auth_url: REDDIT_AUTH_URL.to_string(),
            token_url: REDDIT_TOKEN_URL.to_string(),
            api_base: api::REDDIT_API_BASE.to_string(),
        }
    }

    /// Point the token grant and API calls somewhere other than reddit.com.
    pub fn with_endpoints(mut self, token_url: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.api_base = api_base.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: SystemTime,
    pub scope: Vec<String>,
}

impl RedditToken {
    fn from_response(response: &BasicTokenResponse, previous_refresh: Option<String>) -> Self {
        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        Self {
            access_token: response.access_token().secret().clone(),
            // Reddit omits the refresh token when refreshing
            refresh_token: response
                .refresh_token()
                .map(|token| token.secret().clone())
                .or(previous_refresh),
            expires_at: SystemTime::now() + lifetime,
            scope: response
                .scopes()
                .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        }
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    fn expires_soon(&self) -> bool {
        SystemTime::now() + REFRESH_MARGIN >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub enum AuthState {
    NotAuthenticated,
    PendingAuthorization { csrf_state: String },
    Authenticated { token: RedditToken },
    TokenExpired { token: RedditToken },
}

pub struct RedditClient {
    config: RedditOAuth2Config,
    oauth_client: BasicClient,
    http_client: reqwest::Client,
    api_client: RedditApiClient,
    auth_state: RwLock<AuthState>,
    credentials: Option<Credentials>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl RedditClient {
    pub fn new(config: RedditOAuth2Config) -> Result<Self, CoreError> {
        let invalid = |field: &str, e: oauth2::url::ParseError| {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: format!("Invalid {}: {}", field, e),
            })
        };

        let oauth_client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.auth_url.clone()).map_err(|e| invalid("auth url", e))?,
            Some(TokenUrl::new(config.token_url.clone()).map_err(|e| invalid("token url", e))?),
        )
        .set_auth_type(AuthType::BasicAuth)
        .set_redirect_uri(
            RedirectUrl::new(config.redirect_uri.clone()).map_err(|e| invalid("redirect uri", e))?,
        );

        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let api_client = RedditApiClient::with_base_url(config.user_agent.clone(), &config.api_base)?;

        Ok(Self {
            config,
            oauth_client,
            http_client,
            api_client,
            auth_state: RwLock::new(AuthState::NotAuthenticated),
            credentials: None,
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Credentials used to obtain a token without a browser round trip.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn get_required_scopes() -> Vec<&'static str> {
        vec!["identity", "read", "submit"]
    }

    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    pub fn generate_auth_url(&self, scopes: &[&str]) -> Result<(String, CsrfToken), CoreError> {
        let (auth_url, csrf_token) = self
            .oauth_client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().map(|scope| Scope::new(scope.to_string())))
            .add_extra_param("duration", "permanent")
            .url();

        *self.write_state() = AuthState::PendingAuthorization {
            csrf_state: csrf_token.secret().clone(),
        };

        debug!("Generated authorization URL");
        Ok((auth_url.to_string(), csrf_token))
    }

    /// Finish the code grant from the URL Reddit redirected the browser to.
    pub async fn handle_callback(
        &self,
        callback_url: &str,
        csrf_token: &CsrfToken,
    ) -> Result<RedditToken, CoreError> {
        let auth_failed = |reason: String| {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })
        };

        let url = url::Url::parse(callback_url)
            .map_err(|e| auth_failed(format!("Invalid callback URL: {}", e)))?;
        let param = |name: &str| {
            url.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };

        if let Some(error) = param("error") {
            warn!("Authorization was refused: {}", error);
            return Err(auth_failed(error));
        }

        let state = param("state").ok_or_else(|| auth_failed("Missing state parameter".to_string()))?;
        if state != *csrf_token.secret() {
            return Err(auth_failed("CSRF token mismatch".to_string()));
        }

        let code = param("code").ok_or_else(|| auth_failed("Missing authorization code".to_string()))?;

        let client = self.http_client.clone();
        let response = self
            .oauth_client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(|request| oauth_http(client, request))
            .await
            .map_err(token_error)?;

        let token = RedditToken::from_response(&response, None);
        info!("Authorization code exchanged, token scopes: {:?}", token.scope);
        self.set_token(token.clone());
        Ok(token)
    }

    /// Obtain a token from the configured credentials and confirm it works.
    ///
    /// Returns the name of the authenticated account, or `None` for an
    /// application-only token, which has no account behind it.
    pub async fn authenticate(&self) -> Result<Option<String>, CoreError> {
        let credentials = self.credentials.clone().ok_or_else(|| {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: "No credentials configured".to_string(),
            })
        })?;

        let token = self.grant(&credentials).await?;
        self.set_token(token.clone());

        if credentials == Credentials::ApplicationOnly {
            info!("Authenticated with an application-only token (read only)");
            return Ok(None);
        }

        let user = self.api_client.get_user_info(&token.access_token).await?;
        info!("Authenticated as u/{}", user.name);
        Ok(Some(user.name))
    }

    /// A usable access token, refreshing it first when it is about to expire.
    pub async fn ensure_authenticated(&self) -> Result<String, CoreError> {
        if let Some(access_token) = self.current_access_token()? {
            return Ok(access_token);
        }

        let _guard = self.refresh_lock.lock().await;
        // another task may have refreshed while we waited
        if let Some(access_token) = self.current_access_token()? {
            return Ok(access_token);
        }

        let previous = match self.get_auth_state() {
            AuthState::Authenticated { token } | AuthState::TokenExpired { token } => Some(token),
            _ => None,
        };

        let token = if let Some(refresh) = previous.as_ref().and_then(|t| t.refresh_token.clone()) {
            self.grant(&Credentials::RefreshToken(refresh)).await?
        } else if let Some(credentials) = &self.credentials {
            self.grant(credentials).await?
        } else {
            let reason = if previous.is_some() {
                "Token expired and no refresh token is available"
            } else {
                "Not authenticated"
            };
            return Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: reason.to_string(),
            }));
        };

        let access_token = token.access_token.clone();
        self.set_token(token);
        Ok(access_token)
    }

    fn current_access_token(&self) -> Result<Option<String>, CoreError> {
        match &*self.read_state() {
            AuthState::Authenticated { token } if !token.expires_soon() => {
                Ok(Some(token.access_token.clone()))
            }
            AuthState::PendingAuthorization { .. } => {
                Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                    reason: "Authentication pending, finish the browser authorization first"
                        .to_string(),
                }))
            }
            _ => Ok(None),
        }
    }

    async fn grant(&self, credentials: &Credentials) -> Result<RedditToken, CoreError> {
        let client = self.http_client.clone();
        let response = match credentials {
            Credentials::RefreshToken(refresh_token) => {
                debug!("Requesting access token with refresh token");
                self.oauth_client
                    .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
                    .request_async(|request| oauth_http(client, request))
                    .await
            }
            Credentials::Password { username, password } => {
                debug!("Requesting access token for u/{}", username);
                self.oauth_client
                    .exchange_password(
                        &ResourceOwnerUsername::new(username.clone()),
                        &ResourceOwnerPassword::new(password.clone()),
                    )
                    .request_async(|request| oauth_http(client, request))
                    .await
            }
            Credentials::ApplicationOnly => {
                debug!("Requesting application-only access token");
                self.oauth_client
                    .exchange_client_credentials()
                    .add_scope(Scope::new("read".to_string()))
                    .request_async(|request| oauth_http(client, request))
                    .await
            }
        }
        .map_err(token_error)?;

        let previous_refresh = match credentials {
            Credentials::RefreshToken(token) => Some(token.clone()),
            Credentials::Password { .. } | Credentials::ApplicationOnly => None,
        };
        Ok(RedditToken::from_response(&response, previous_refresh))
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(&*self.read_state(), AuthState::Authenticated { token } if !token.is_expired())
    }

    pub fn needs_refresh(&self) -> bool {
        match &*self.read_state() {
            AuthState::TokenExpired { .. } => true,
            AuthState::Authenticated { token } => token.expires_soon(),
            _ => false,
        }
    }

    pub fn set_token(&self, token: RedditToken) {
        *self.write_state() = if token.is_expired() {
            AuthState::TokenExpired { token }
        } else {
            AuthState::Authenticated { token }
        };
    }

    pub fn get_auth_state(&self) -> AuthState {
        self.read_state().clone()
    }

    fn mark_expired(&self) {
        let mut state = self.write_state();
        if let AuthState::Authenticated { token } = &*state {
            *state = AuthState::TokenExpired {
                token: token.clone(),
            };
        }
    }

    /// Run an API call with a valid token, refreshing once if Reddit rejects it.
    async fn authorized<T, F, Fut>(&self, call: F) -> Result<T, CoreError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let access_token = self.ensure_authenticated().await?;
        match call(access_token).await {
            Err(CoreError::RedditApi(RedditApiError::InvalidToken)) => {
                warn!("Access token rejected, refreshing");
                self.mark_expired();
                let access_token = self.ensure_authenticated().await?;
                call(access_token).await
            }
            other => other,
        }
    }

    pub async fn fetch_new_posts(&self, subreddits: &str, limit: u32) -> Result<Vec<Item>, CoreError> {
        let api = &self.api_client;
        let posts = self
            .authorized(|token| async move { api.get_new_posts(&token, subreddits, limit).await })
            .await?;
        Ok(posts.into_iter().map(Item::from).collect())
    }

    pub async fn fetch_new_comments(
        &self,
        subreddits: &str,
        limit: u32,
    ) -> Result<Vec<Item>, CoreError> {
        let api = &self.api_client;
        let comments = self
            .authorized(|token| async move { api.get_new_comments(&token, subreddits, limit).await })
            .await?;
        Ok(comments.into_iter().map(Item::from).collect())
    }

    pub async fn get_rate_limit_status(&self) -> rate_limiter::RateLimitStatus {
        self.api_client.get_rate_limit_status().await
    }

    fn read_state(&self) -> RwLockReadGuard<'_, AuthState> {
        self.auth_state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, AuthState> {
        self.auth_state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ReplySink for RedditClient {
    async fn reply(&self, item: &Item, text: &str) -> Result<(), CoreError> {
        let api = &self.api_client;
        let thing_id = api::fullname(item);
        let thing_id = thing_id.as_str();
        self.authorized(|token| async move { api.submit_comment(&token, thing_id, text).await })
            .await
    }
}

#[async_trait]
impl ListingSource for RedditClient {
    async fn fetch_newest(&self, kind: ItemKind, subreddits: &str) -> Result<Vec<Item>, CoreError> {
        match kind {
            ItemKind::Post => self.fetch_new_posts(subreddits, api::MAX_LISTING_LIMIT).await,
            ItemKind::Comment => self.fetch_new_comments(subreddits, api::MAX_LISTING_LIMIT).await,
        }
    }
}

/// Token endpoint transport. Reddit rejects grants that lack a descriptive User-Agent,
/// so this goes through our own client instead of oauth2's default one.
async fn oauth_http(client: reqwest::Client, request: HttpRequest) -> Result<HttpResponse, reqwest::Error> {
    let response = client
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;
    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

fn token_error(error: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> CoreError {
    match error {
        RequestTokenError::ServerResponse(response) => {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: response.to_string(),
            })
        }
        RequestTokenError::Request(e) => CoreError::Network(e),
        RequestTokenError::Parse(e, _) => CoreError::RedditApi(RedditApiError::InvalidResponse {
            details: format!("Malformed token response: {}", e),
        }),
        RequestTokenError::Other(reason) => {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })
        }
    }
}
