//! HTTP fetcher with an explicit retry policy.
//!
//! Transient failures (timeouts, connection errors, 5xx, 429) are retried with
//! exponential backoff; anything else fails on the first attempt.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument, warn};
use url::Url;

use kubedocs_shared::{
    FetchConfig, FetchErrorKind, FetchedResource, KubedocsError, Payload, Result, RetryConfig,
};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How often and how patiently a request is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Whether the caller expects text or raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Text,
    Binary,
}

/// Thin wrapper around a shared `reqwest::Client` plus a retry policy.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    retry: RetryPolicy,
}

impl Fetcher {
    /// Build a fetcher from the `[fetch]` and `[retry]` configuration.
    pub fn new(fetch: &FetchConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(fetch.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(fetch.max_redirects))
            .timeout(Duration::from_secs(fetch.timeout_secs))
            .build()
            .map_err(|e| KubedocsError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, retry })
    }

    /// Fetch a page as text.
    pub async fn fetch_text(&self, url: &Url) -> Result<FetchedResource> {
        self.fetch(url, BodyKind::Text).await
    }

    /// Fetch a resource as raw bytes.
    pub async fn fetch_bytes(&self, url: &Url) -> Result<FetchedResource> {
        self.fetch(url, BodyKind::Binary).await
    }

    /// Fetch `url`, retrying transient failures per the retry policy.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url, body: BodyKind) -> Result<FetchedResource> {
        let mut attempt = 1;
        loop {
            match self.attempt(url, body).await {
                Ok((final_url, content_type, payload)) => {
                    debug!(attempt, bytes = payload.len(), "fetched");
                    return Ok(FetchedResource {
                        url: url.clone(),
                        final_url,
                        content_type,
                        payload,
                        attempts: attempt,
                    });
                }
                Err(kind) if kind.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %kind,
                        delay_ms = delay.as_millis() as u64,
                        "transient fetch failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(kind) => {
                    return Err(KubedocsError::FetchFailed {
                        url: url.to_string(),
                        kind,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// A single request/response exchange.
    async fn attempt(
        &self,
        url: &Url,
        body: BodyKind,
    ) -> std::result::Result<(Url, Option<String>, Payload), FetchErrorKind> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchErrorKind::HttpStatus(status.as_u16()));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let payload = match body {
            BodyKind::Text => Payload::Text(response.text().await.map_err(|e| body_error(&e))?),
            BodyKind::Binary => {
                Payload::Binary(response.bytes().await.map_err(|e| body_error(&e))?.to_vec())
            }
        };

        Ok((final_url, content_type, payload))
    }
}

/// Map a request error to a fetch error kind.
fn classify(err: &reqwest::Error) -> FetchErrorKind {
    if err.is_timeout() {
        FetchErrorKind::Timeout
    } else if err.is_connect() {
        FetchErrorKind::Connect
    } else if let Some(status) = err.status() {
        FetchErrorKind::HttpStatus(status.as_u16())
    } else {
        FetchErrorKind::Request
    }
}

fn body_error(err: &reqwest::Error) -> FetchErrorKind {
    if err.is_timeout() {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::Body
    }
}
