//! REST client
//!
//! Thin `reqwest` wrapper that runs every call through the bucket
//! limiter: acquire the route's bucket, perform the request, feed the
//! response headers back. A 429 is retried once after its `Retry-After`
//! window; everything else surfaces as [`RestError`].

use crate::headers::RateLimitHeaders;
use crate::limiter::RestRateLimiter;
use crate::route::Route;
use chat_client_common::{ClientConfig, LimitError};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const USER_AGENT: &str = concat!("chat-client (", env!("CARGO_PKG_VERSION"), ")");
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by REST calls
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The rate-limit wait was abandoned at the caller's deadline
    #[error(transparent)]
    Limit(#[from] LimitError),

    /// The HTTP transport failed
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("api returned status {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The response body was not the expected shape
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The client could not be constructed from the configuration
    #[error("invalid client configuration: {0}")]
    Config(String),
}

/// Gateway connection parameters the server recommends for this token
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBot {
    /// Gateway WebSocket URL to connect to
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    /// Session start budget and identify concurrency
    pub session_start_limit: SessionStartLimit,
}

/// How many fresh sessions this token may still start
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    /// Session starts allowed per window
    pub total: u32,
    /// Session starts left in the current window
    pub remaining: u32,
    /// Milliseconds until the window resets
    pub reset_after: u64,
    /// Maximum concurrent identifies (identify bucket count)
    pub max_concurrency: u16,
}

/// Rate-limited HTTP access to the REST API
pub struct RestClient {
    http: reqwest::Client,
    limiter: RestRateLimiter,
    config: Arc<ClientConfig>,
}

impl RestClient {
    /// Build a client for the configured token and base URL
    pub fn new(config: Arc<ClientConfig>) -> Result<Self, RestError> {
        let mut auth = HeaderValue::from_str(&format!("Bot {}", config.token))
            .map_err(|_| RestError::Config("token contains non-ASCII characters".to_string()))?;
        auth.set_sensitive(true);

        let mut default_headers = HeaderMap::new();
        default_headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(default_headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            limiter: RestRateLimiter::new(),
            config,
        })
    }

    /// Perform a rate-limited call and decode the JSON response
    ///
    /// Acquires the route's bucket (waiting out any limits, bounded by
    /// `deadline`), sends the request, and reports the response headers
    /// back to the limiter. One 429 is absorbed by retrying after the
    /// server's `Retry-After`; a second surfaces as [`RestError::Api`].
    pub async fn request<T: DeserializeOwned>(
        &self,
        route: &Route,
        body: Option<&serde_json::Value>,
        deadline: Option<Instant>,
    ) -> Result<T, RestError> {
        let mut retried = false;

        loop {
            let permit = self.limiter.acquire(route, deadline).await?;

            let url = format!("{}{}", self.config.rest_url, route.path());
            let mut request = self.http.request(route.method().clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            tracing::debug!(route = %route, "rest request");
            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    // Permit drop burns the slot conservatively
                    drop(permit);
                    return Err(err.into());
                }
            };

            let headers = RateLimitHeaders::from_headers(response.headers());
            let status = response.status();
            permit.complete(&headers);

            if status == StatusCode::TOO_MANY_REQUESTS && !retried {
                retried = true;
                tracing::warn!(route = %route, "rate limited; retrying after the taught window");
                // The next acquire waits out the Retry-After the limiter
                // just recorded
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(route = %route, status = status.as_u16(), "rest request failed");
                return Err(RestError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            let text = response.text().await?;
            return Ok(serde_json::from_str(&text)?);
        }
    }

    /// Fetch the recommended gateway parameters for this token
    ///
    /// Used for shard auto-detection: supplies the shard count, identify
    /// concurrency, and gateway URL.
    pub async fn get_gateway_bot(&self) -> Result<GatewayBot, RestError> {
        let route = Route::new(Method::GET, "/gateway/bot", "/gateway/bot");
        self.request(&route, None, None).await
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("rest_url", &self.config.rest_url)
            .finish()
    }
}
