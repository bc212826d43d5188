//! Rate-limited HTTP transport with bounded retry.
//!
//! # Retry Strategy
//!
//! Every failure is retried until the attempt budget is spent:
//! - Network errors → retry
//! - Any non-2xx status (including 429 and 5xx) → retry
//! - 2xx → return immediately
//! - Backoff before attempt `n`: `base_delay × 2^(n-1)` (capped at 2^5)
//!
//! Exhaustion fails the one request only. Callers (the paginator) decide
//! what that means for the surrounding fetch.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::error::TransportError;

/// A single outbound request.
#[derive(Debug, Clone)]
pub enum Request {
    PostJson {
        url: String,
        headers: Vec<(String, String)>,
        body: serde_json::Value,
    },
    Get {
        url: String,
        headers: Vec<(String, String)>,
    },
}

impl Request {
    pub fn url(&self) -> &str {
        match self {
            Request::PostJson { url, .. } | Request::Get { url, .. } => url,
        }
    }

    fn headers(&self) -> &[(String, String)] {
        match self {
            Request::PostJson { headers, .. } | Request::Get { headers, .. } => headers,
        }
    }
}

/// Body and status of a successful response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn json(&self) -> Result<serde_json::Value, TransportError> {
        serde_json::from_str(&self.body).map_err(|e| TransportError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}

/// Sends one request, retrying internally.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<RawResponse, TransportError>;
}

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay slept before the zero-based `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }

    /// Run `op` until it succeeds or the budget is spent.
    ///
    /// `op` receives the zero-based attempt number and reports failures as
    /// plain messages; the last one ends up in [`TransportError::Exhausted`].
    pub async fn run<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let mut last_err = String::new();

        for attempt in 0..self.max_attempts {
            let delay = self.backoff(attempt);
            if !delay.is_zero() {
                debug!(url, attempt, ?delay, "backing off before retry");
                tokio::time::sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(message) => {
                    warn!(
                        url,
                        "request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_attempts,
                        message
                    );
                    last_err = message;
                }
            }
        }

        Err(TransportError::Exhausted {
            url: url.to_string(),
            attempts: self.max_attempts,
            message: last_err,
        })
    }
}

impl From<&TransportConfig> for RetryPolicy {
    fn from(config: &TransportConfig) -> Self {
        RetryPolicy::new(config.max_attempts, config.retry_delay())
    }
}

/// [`Transport`] backed by a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        Self::with_headers(config, &[])
    }

    /// Build a transport whose client sends `default_headers` on every request.
    pub fn with_headers(
        config: &TransportConfig,
        default_headers: &[(&str, &str)],
    ) -> Result<Self, TransportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in default_headers {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Build(e.to_string()))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| TransportError::Build(e.to_string()))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self {
            client,
            retry: RetryPolicy::from(config),
        })
    }

    async fn attempt(&self, request: &Request) -> Result<RawResponse, String> {
        let mut builder = match request {
            Request::PostJson { url, body, .. } => self.client.post(url).json(body),
            Request::Get { url, .. } => self.client.get(url),
        };
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;

        if !status.is_success() {
            return Err(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            ));
        }

        Ok(RawResponse {
            url: request.url().to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<RawResponse, TransportError> {
        self.retry
            .run(request.url(), |_| self.attempt(request))
            .await
    }
}
