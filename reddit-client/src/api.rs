use crate::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use mintwatch_core::{CoreError, Item, ItemKind, RedditApiError};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";

/// Reddit returns at most 100 children per listing page.
pub const MAX_LISTING_LIMIT: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub author: Option<String>,
    pub subreddit: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub created_utc: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    #[serde(default)]
    pub body: String,
    pub author: Option<String>,
    pub subreddit: String,
    #[serde(default)]
    pub link_id: String,
    #[serde(default)]
    pub created_utc: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditUserData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_utc: f64,
}

#[derive(Debug, Deserialize)]
struct CommentSubmitResponse {
    json: CommentSubmitBody,
}

#[derive(Debug, Deserialize)]
struct CommentSubmitBody {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    rate_limiter: RateLimiter,
    base_url: String,
    user_agent: String,
}

impl RedditApiClient {
    pub fn new(user_agent: String) -> Result<Self, CoreError> {
        Self::with_base_url(user_agent, REDDIT_API_BASE)
    }

    pub fn with_base_url(user_agent: String, base_url: impl Into<String>) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new(RateLimitConfig::reddit_oauth()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        access_token: &str,
        query_params: Option<&[(&str, &str)]>,
        form: Option<&[(&str, &str)]>,
    ) -> Result<Response, CoreError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let start_time = Instant::now();

        let queue_wait = self.rate_limiter.acquire().await;
        debug!(
            "Acquired rate limit token for {} {} after {:?}",
            method, endpoint, queue_wait
        );

        let mut request_builder = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(access_token);

        if let Some(params) = query_params {
            request_builder = request_builder.query(params);
        }
        if let Some(fields) = form {
            request_builder = request_builder.form(fields);
        }

        debug!("Making Reddit API request: {} {}", method, endpoint);
        let response = match request_builder.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                if e.is_timeout() {
                    return Err(CoreError::RedditApi(RedditApiError::RequestTimeout));
                }
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            error!("Request failed with status: {} for {}", status, endpoint);
            return Err(CoreError::RedditApi(match status.as_u16() {
                429 => {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|value| value.to_str().ok())
                        .and_then(|value| value.parse::<u64>().ok())
                        .unwrap_or(60);
                    warn!("Rate limited, retry after {} seconds", retry_after);
                    RedditApiError::RateLimitExceeded { retry_after }
                }
                401 => RedditApiError::InvalidToken,
                403 => RedditApiError::Forbidden {
                    resource: endpoint.to_string(),
                },
                404 => RedditApiError::InvalidResponse {
                    details: "Resource not found".to_string(),
                },
                code if status.is_server_error() => RedditApiError::ServerError { status_code: code },
                code => RedditApiError::InvalidResponse {
                    details: format!("Unexpected status {} for {}", code, endpoint),
                },
            }));
        }

        debug!(
            "Request successful: {} {} in {:?}",
            status,
            endpoint,
            start_time.elapsed()
        );
        Ok(response)
    }

    pub async fn get_user_info(&self, access_token: &str) -> Result<RedditUserData, CoreError> {
        let response = self
            .make_request(Method::GET, "/api/v1/me", access_token, None, None)
            .await?;

        let user_data: RedditUserData = response.json().await.map_err(|e| {
            error!("Failed to parse user data: {}", e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: "Failed to parse user data".to_string(),
            })
        })?;

        debug!("Retrieved user info for: {}", user_data.name);
        Ok(user_data)
    }

    /// Newest submissions first, as Reddit orders them.
    pub async fn get_new_posts(
        &self,
        access_token: &str,
        subreddits: &str,
        limit: u32,
    ) -> Result<Vec<RedditPostData>, CoreError> {
        let endpoint = format!("/r/{}/new", subreddits);
        let listing: RedditListing<RedditPostData> =
            self.get_listing(access_token, &endpoint, limit).await?;
        Ok(listing.data.children.into_iter().map(|c| c.data).collect())
    }

    /// Newest comments first, as Reddit orders them.
    pub async fn get_new_comments(
        &self,
        access_token: &str,
        subreddits: &str,
        limit: u32,
    ) -> Result<Vec<RedditCommentData>, CoreError> {
        let endpoint = format!("/r/{}/comments", subreddits);
        let listing: RedditListing<RedditCommentData> =
            self.get_listing(access_token, &endpoint, limit).await?;
        Ok(listing.data.children.into_iter().map(|c| c.data).collect())
    }

    async fn get_listing<T>(
        &self,
        access_token: &str,
        endpoint: &str,
        limit: u32,
    ) -> Result<RedditListing<T>, CoreError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let limit = limit.min(MAX_LISTING_LIMIT).to_string();
        let params = [("limit", limit.as_str()), ("raw_json", "1")];
        let response = self
            .make_request(Method::GET, endpoint, access_token, Some(&params), None)
            .await?;

        let listing: RedditListing<T> = response.json().await.map_err(|e| {
            error!("Failed to parse listing {}: {}", endpoint, e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse listing {}", endpoint),
            })
        })?;

        debug!(
            "Retrieved {} children from {}",
            listing.data.children.len(),
            endpoint
        );
        Ok(listing)
    }

    /// Post a comment under the thing with the given fullname (`t3_...` or `t1_...`).
    pub async fn submit_comment(
        &self,
        access_token: &str,
        thing_id: &str,
        text: &str,
    ) -> Result<(), CoreError> {
        let form = [("api_type", "json"), ("thing_id", thing_id), ("text", text)];
        let response = self
            .make_request(Method::POST, "/api/comment", access_token, None, Some(&form))
            .await?;

        let body: CommentSubmitResponse = response.json().await.map_err(|e| {
            error!("Failed to parse comment response: {}", e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: "Failed to parse comment response".to_string(),
            })
        })?;

        if let Some(first) = body.json.errors.first() {
            return Err(CoreError::RedditApi(submit_error(first)));
        }

        info!("Posted reply to {}", thing_id);
        Ok(())
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.status().await
    }
}

/// `["RATELIMIT", "... try again in 5 minutes.", "ratelimit"]` and friends.
fn submit_error(entry: &[serde_json::Value]) -> RedditApiError {
    let code = entry.first().and_then(|v| v.as_str()).unwrap_or("UNKNOWN");
    let message = entry.get(1).and_then(|v| v.as_str()).unwrap_or_default();

    if code == "RATELIMIT" {
        return RedditApiError::RateLimitExceeded {
            retry_after: parse_wait_seconds(message).unwrap_or(60),
        };
    }
    RedditApiError::ReplyRejected {
        reason: if message.is_empty() {
            code.to_string()
        } else {
            format!("{}: {}", code, message)
        },
    }
}

fn parse_wait_seconds(message: &str) -> Option<u64> {
    let words: Vec<&str> = message.split_whitespace().collect();
    words.windows(2).find_map(|pair| {
        let amount: u64 = pair[0].parse().ok()?;
        let unit = pair[1].trim_end_matches(|c: char| !c.is_alphabetic());
        match unit {
            "second" | "seconds" => Some(amount),
            "minute" | "minutes" => Some(amount.saturating_mul(60)),
            _ => None,
        }
    })
}

impl From<RedditPostData> for Item {
    fn from(post: RedditPostData) -> Self {
        Self {
            id: post.id,
            kind: ItemKind::Post,
            origin: post.subreddit,
            author: post.author,
            title: Some(post.title),
            body: post.selftext,
        }
    }
}

impl From<RedditCommentData> for Item {
    fn from(comment: RedditCommentData) -> Self {
        Self {
            id: comment.id,
            kind: ItemKind::Comment,
            origin: comment.subreddit,
            author: comment.author,
            title: None,
            body: comment.body,
        }
    }
}

/// Reddit fullname of an item: `t3_` for submissions, `t1_` for comments.
pub fn fullname(item: &Item) -> String {
    match item.kind {
        ItemKind::Post => format!("t3_{}", item.id),
        ItemKind::Comment => format!("t1_{}", item.id),
    }
}
