//! Outbound HTTP for listing pages, articles, and image probes.
//!
//! One [`FetchClient`] is built per source from its [`FetchSettings`]: the
//! source's identifying headers and timeout are baked into the underlying
//! `reqwest::Client`, while the [`HostRateLimiter`] is shared across every
//! client so two sources hitting the same host still take turns.
//!
//! Transient failures are retried according to the source's
//! [`RetryPolicy`]; anything else surfaces as a [`FetchError`] immediately.

pub mod error;
pub mod rate_limiter;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Response};
use tracing::{debug, instrument, warn};
use url::Url;

pub use error::FetchError;
pub use rate_limiter::HostRateLimiter;
pub use retry::RetryPolicy;

/// Chrome-ish user agent; several sources block obviously scripted clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Per-source request policy.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
    /// Optional `Accept-Language` header.
    pub accept_language: Option<String>,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Minimum spacing between requests to the same host.
    pub min_interval: Duration,
    /// Retry behaviour for transient failures.
    pub retry: RetryPolicy,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: Some("en-US,en;q=0.9".to_string()),
            timeout: Duration::from_secs(20),
            min_interval: Duration::from_millis(800),
            retry: RetryPolicy::default(),
        }
    }
}

/// A successfully fetched text document.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Decoded response body.
    pub body: String,
    /// HTTP status (always 2xx).
    pub status: u16,
    /// URL after redirects; relative links resolve against this.
    pub final_url: String,
}

/// HTTP client bound to one source's headers and politeness settings.
#[derive(Debug, Clone)]
pub struct FetchClient {
    source: String,
    http: Client,
    limiter: Arc<HostRateLimiter>,
    min_interval: Duration,
    retry: RetryPolicy,
}

impl FetchClient {
    /// Builds a client for `source` sharing `limiter` with other sources.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidHeader`] for an unusable header value and
    /// [`FetchError::Client`] if reqwest cannot construct the client.
    pub fn new(
        source: impl Into<String>,
        settings: &FetchSettings,
        limiter: Arc<HostRateLimiter>,
    ) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(lang) = &settings.accept_language {
            let value = HeaderValue::from_str(lang).map_err(|_| FetchError::InvalidHeader {
                name: "Accept-Language",
                value: lang.clone(),
            })?;
            headers.insert(ACCEPT_LANGUAGE, value);
        }

        let http = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .timeout(settings.timeout)
            .gzip(true)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            source: source.into(),
            http,
            limiter,
            min_interval: settings.min_interval,
            retry: settings.retry.clone(),
        })
    }

    /// The source this client fetches for.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fetches `url` as text, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last [`FetchError`] once retries are exhausted or the
    /// failure is permanent.
    #[instrument(level = "debug", skip(self), fields(source = %self.source))]
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.fetch_once(url).await {
                Ok(page) => return Ok(page),
                Err(e) => match self.retry.next_delay(&e, attempt) {
                    Some(delay) => {
                        warn!(
                            %url,
                            attempt,
                            max = self.retry.max_retries(),
                            ?delay,
                            error = %e,
                            "Fetch failed; backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    /// Streams at most `max_bytes` of `url`, stopping early once `done`
    /// reports that the bytes read so far are sufficient. Never retried.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] for non-2xx responses or transport failures.
    pub async fn fetch_prefix<F>(
        &self,
        url: &str,
        max_bytes: usize,
        mut done: F,
    ) -> Result<Vec<u8>, FetchError>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let mut response = self.send(url).await?;
        let mut buf = Vec::new();
        while buf.len() < max_bytes {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| FetchError::from_reqwest(url, e))?;
            let Some(chunk) = chunk else { break };
            let take = chunk.len().min(max_bytes - buf.len());
            buf.extend_from_slice(&chunk[..take]);
            if done(&buf) {
                break;
            }
        }
        debug!(%url, bytes = buf.len(), "Read response prefix");
        Ok(buf)
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self.send(url).await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        debug!(%url, status, bytes = body.len(), "Fetched page");
        Ok(FetchedPage {
            body,
            status,
            final_url,
        })
    }

    /// Waits for the host slot, sends a GET, and rejects non-2xx statuses.
    async fn send(&self, url: &str) -> Result<Response, FetchError> {
        let parsed = parse_http_url(url)?;
        self.limiter.acquire(&parsed, self.min_interval).await;

        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(retry::parse_retry_after);
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after,
            });
        }
        Ok(response)
    }
}

fn parse_http_url(url: &str) -> Result<Url, FetchError> {
    match Url::parse(url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(u),
        _ => Err(FetchError::InvalidUrl {
            url: url.to_string(),
        }),
    }
}
