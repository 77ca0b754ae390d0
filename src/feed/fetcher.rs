use futures::stream::StreamExt;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use super::merge::{merge, MergeOutcome};
use super::parser::parse_feed;
use crate::storage::Feed;
use crate::util::{http_date, now, validate_feed_url, HostPolicy, UrlValidationError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 3;

/// Errors that can occur while fetching a feed.
///
/// Every variant leaves the feed exactly as it was before the call.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Missing feed URL")]
    MissingUrl,
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection, TLS, redirect limit)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    /// Non-2xx status other than 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large")]
    ResponseTooLarge,
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body is not RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
}

/// What a successful fetch did to the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Server answered 304; the feed was not touched.
    NotModified,
    Updated(MergeOutcome),
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    /// Bound on the whole exchange: connect, headers and body.
    pub timeout: Duration,
    pub max_body_bytes: usize,
    pub host_policy: HostPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("feedshelf/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            host_policy: HostPolicy::default(),
        }
    }
}

/// Conditional-GET feed fetcher. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(create_redirect_policy(config.host_policy))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: FetcherConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetch `feed.url` and merge any new entries into `feed`.
    ///
    /// Sends `If-None-Match` when the feed has an ETag, otherwise
    /// `If-Modified-Since` when it has been refreshed before. On a 304 or any
    /// error the feed is left untouched. The feed is only mutated after the
    /// last await point, so dropping the returned future is also safe.
    ///
    /// Callers must not run two fetches of the same feed concurrently.
    pub async fn fetch(&self, feed: &mut Feed) -> Result<FetchStatus, FetchError> {
        if feed.url.is_empty() {
            return Err(FetchError::MissingUrl);
        }
        let url = validate_feed_url(&feed.url, self.config.host_policy)?;
        let started = now();

        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, &self.config.user_agent);
        if !feed.etag.is_empty() {
            request = request.header(IF_NONE_MATCH, &feed.etag);
        } else if let Some(refreshed) = feed.refreshed {
            request = request.header(IF_MODIFIED_SINCE, http_date(refreshed));
        }

        let body = tokio::time::timeout(
            self.config.timeout,
            self.exchange(request),
        )
        .await
        .map_err(|_| FetchError::Timeout)??;

        let Some((etag, bytes)) = body else {
            tracing::debug!(url = %feed.url, "Feed not modified");
            return Ok(FetchStatus::NotModified);
        };

        let parsed = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

        let outcome = merge(feed, parsed, etag, started);
        tracing::debug!(
            url = %feed.url,
            items = outcome.accepted,
            stale = outcome.rejected_stale,
            future = outcome.rejected_future,
            "Feed merged"
        );
        Ok(FetchStatus::Updated(outcome))
    }

    /// Send the request; `None` on 304, otherwise the ETag and the body.
    async fn exchange(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<(String, Vec<u8>)>, FetchError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        if !status.is_success() {
            tracing::debug!(url = %response.url(), status = status.as_u16(), "Feed request failed");
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = read_limited_bytes(response, self.config.max_body_bytes).await?;
        Ok(Some((etag, bytes)))
    }
}

/// Follow at most [`MAX_REDIRECTS`] hops, refusing loops and any hop whose
/// target `host_policy` would not accept as a feed URL.
fn create_redirect_policy(host_policy: HostPolicy) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        if let Err(e) = validate_feed_url(url.as_str(), host_policy) {
            tracing::warn!(to = %url, error = %e, "Refusing redirect");
            return attempt.error(e);
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: Content-Length already over the cap
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
