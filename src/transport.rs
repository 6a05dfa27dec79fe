//! # API Transport Module
//!
//! ## Purpose
//! Handles all HTTP communication with the CourtListener API: URL resolution
//! against the configured base, token authentication, bounded timeouts, retry
//! of transient failures, and rate-limit back-off. Every request updates a
//! shared metrics counter, whether it succeeds or fails.
//!
//! ## Input/Output Specification
//! - **Input**: API paths or absolute URLs, query/form parameters
//! - **Output**: Raw responses with status, body bytes, and retry hints
//! - **Rate Limits**: Honors server-issued Retry-After on HTTP 429
//!
//! ## Key Features
//! - Absolute URLs pass through untouched; API paths join the base URL
//! - 429 responses sleep for the server-supplied delay and retry
//! - 5xx responses retry with exponential back-off
//! - Other 4xx responses surface immediately as terminal failures
//! - Call count, byte, and latency metrics on every attempt
//!
//! ## Architecture
//! The retry loop sits above an [`HttpBackend`] trait that performs exactly
//! one request. Production uses a reqwest-backed implementation; tests script
//! response sequences against the same seam.

use crate::config::Config;
use crate::errors::{FetchError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// A single HTTP response as seen by the retry loop
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed Retry-After header in seconds, if the server sent one
    pub retry_after: Option<u64>,
    /// Response body bytes
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self, context: &str) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::Json {
            context: context.to_string(),
            source: e,
        })
    }
}

/// Performs exactly one HTTP request; the retry policy lives above this seam
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// Issue a single GET request
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse>;

    /// Issue a single form-encoded POST request
    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<RawResponse>;
}

/// reqwest-backed HTTP implementation used in production
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    /// Build the HTTP client with token authentication and a bounded timeout.
    /// An empty token sends no Authorization header, so the server answers
    /// unauthenticated calls with its normal 401/403.
    pub fn new(token: &str, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if !token.is_empty() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", token)
                    .parse()
                    .map_err(|e| FetchError::Config {
                        message: format!("invalid API token format: {}", e),
                    })?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .user_agent("caselaw-fetch/0.1")
            .build()?;

        Ok(Self { client })
    }

    async fn convert(response: reqwest::Response) -> Result<RawResponse> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse> {
        let response = self.client.get(url).query(query).send().await?;
        Self::convert(response).await
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<RawResponse> {
        let response = self.client.post(url).form(form).send().await?;
        Self::convert(response).await
    }
}

/// Per-transport request counters, reset only by constructing a new transport
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMetrics {
    /// Requests attempted, including retries and failures
    pub call_count: u64,
    /// Cumulative response body bytes
    pub total_bytes: u64,
    /// Cumulative wall time spent in requests
    pub total_time: Duration,
}

/// Request body shape handed to the retry loop
#[derive(Clone, Copy)]
enum Payload<'a> {
    Get { query: &'a [(String, String)] },
    Post { form: &'a [(String, String)] },
}

/// HTTP transport with retry, rate-limit back-off, and metrics
pub struct ApiTransport {
    base_url: String,
    backend: Arc<dyn HttpBackend>,
    max_retries: u32,
    rate_limit_fallback: Duration,
    backoff_base: Duration,
    metrics: Arc<RwLock<ClientMetrics>>,
}

impl ApiTransport {
    /// Create a transport speaking to the configured API over reqwest
    pub fn new(config: &Config) -> Result<Self> {
        let backend = ReqwestBackend::new(&config.api.token, config.request_timeout())?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Create a transport over an arbitrary backend
    pub fn with_backend(config: &Config, backend: Arc<dyn HttpBackend>) -> Self {
        Self {
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            backend,
            max_retries: config.retry.max_retries,
            rate_limit_fallback: Duration::from_secs(config.retry.rate_limit_fallback_secs),
            backoff_base: Duration::from_millis(config.retry.backoff_base_ms),
            metrics: Arc::new(RwLock::new(ClientMetrics::default())),
        }
    }

    /// Snapshot of the accumulated request metrics
    pub async fn metrics(&self) -> ClientMetrics {
        *self.metrics.read().await
    }

    /// GET a path or absolute URL, retrying transient failures
    pub async fn get(&self, path_or_url: &str, query: &[(String, String)]) -> Result<RawResponse> {
        let url = self.resolve_url(path_or_url);
        self.execute(&url, Payload::Get { query }).await
    }

    /// POST a form to a path or absolute URL, retrying transient failures.
    /// Callers are expected to only POST idempotent requests.
    pub async fn post(&self, path_or_url: &str, form: &[(String, String)]) -> Result<RawResponse> {
        let url = self.resolve_url(path_or_url);
        self.execute(&url, Payload::Post { form }).await
    }

    /// Resolve a path against the base URL; absolute URLs pass through
    fn resolve_url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else if path_or_url.starts_with('/') {
            format!("{}{}", self.base_url, path_or_url)
        } else {
            format!("{}/{}", self.base_url, path_or_url)
        }
    }

    /// Retry loop shared by GET and POST
    async fn execute(&self, url: &str, payload: Payload<'_>) -> Result<RawResponse> {
        let mut attempts = 0u32;
        let mut backoff = self.backoff_base;
        loop {
            let started = Instant::now();
            let result = match payload {
                Payload::Get { query } => self.backend.get(url, query).await,
                Payload::Post { form } => self.backend.post_form(url, form).await,
            };
            attempts += 1;
            self.record_attempt(&result, started.elapsed()).await;

            let response = result?;
            if response.status == 429 {
                if attempts > self.max_retries {
                    return Err(FetchError::RateLimitExhausted {
                        url: url.to_string(),
                        attempts,
                    });
                }
                let wait = response
                    .retry_after
                    .map(Duration::from_secs)
                    .unwrap_or(self.rate_limit_fallback);
                warn!(url, wait_secs = wait.as_secs(), "rate limited, backing off");
                sleep(wait).await;
                continue;
            }
            if response.status >= 500 {
                if attempts > self.max_retries {
                    return Err(FetchError::RetriesExhausted {
                        url: url.to_string(),
                        attempts,
                        last_status: response.status,
                    });
                }
                warn!(
                    url,
                    status = response.status,
                    backoff_ms = backoff.as_millis() as u64,
                    "server error, retrying"
                );
                sleep(backoff).await;
                backoff *= 2;
                continue;
            }
            if !response.is_success() {
                return Err(FetchError::HttpStatus {
                    status: response.status,
                    url: url.to_string(),
                });
            }
            debug!(url, status = response.status, bytes = response.body.len(), "request ok");
            return Ok(response);
        }
    }

    /// Record one attempt in the metrics, failures included
    async fn record_attempt(&self, result: &Result<RawResponse>, elapsed: Duration) {
        let bytes = result.as_ref().map(|r| r.body.len() as u64).unwrap_or(0);
        let mut metrics = self.metrics.write().await;
        metrics.call_count += 1;
        metrics.total_bytes += bytes;
        metrics.total_time += elapsed;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;
    use crate::errors::FetchError;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.retry.backoff_base_ms = 1;
        config.retry.rate_limit_fallback_secs = 0;
        config
    }

    fn transport_with(backend: Arc<ScriptedBackend>) -> ApiTransport {
        ApiTransport::with_backend(&fast_config(), backend)
    }

    #[tokio::test]
    async fn rate_limited_once_then_ok() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(429, Some(0));
        backend.push_json(200, serde_json::json!({"ok": true}));
        let transport = transport_with(backend.clone());

        let response = transport.get("/search/", &[]).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn rate_limit_budget_exhausted() {
        let backend = Arc::new(ScriptedBackend::new());
        for _ in 0..4 {
            backend.push_status(429, Some(0));
        }
        let transport = transport_with(backend.clone());

        let err = transport.get("/search/", &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimitExhausted { attempts: 4, .. }));
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn server_errors_retry_then_succeed() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(503, None);
        backend.push_status(502, None);
        backend.push_json(200, serde_json::json!({}));
        let transport = transport_with(backend.clone());

        let response = transport.get("/clusters/1/", &[]).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn server_errors_exhaust_budget() {
        let backend = Arc::new(ScriptedBackend::new());
        for _ in 0..4 {
            backend.push_status(500, None);
        }
        let transport = transport_with(backend.clone());

        let err = transport.get("/clusters/1/", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::RetriesExhausted { last_status: 500, .. }
        ));
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(404, None);
        let transport = transport_with(backend.clone());

        let err = transport.get("/clusters/404/", &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn url_resolution() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(200, serde_json::json!({}));
        backend.push_json(200, serde_json::json!({}));
        let transport = transport_with(backend.clone());

        transport.get("/search/", &[]).await.unwrap();
        transport
            .get("https://elsewhere.test/api/page/2", &[])
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(
            calls[0].url,
            "https://www.courtlistener.com/api/rest/v4/search/"
        );
        assert_eq!(calls[1].url, "https://elsewhere.test/api/page/2");
    }

    #[tokio::test]
    async fn metrics_count_failed_attempts() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(503, None);
        backend.push_bytes(200, vec![0u8; 10]);
        let transport = transport_with(backend.clone());

        transport.get("/search/", &[]).await.unwrap();
        let metrics = transport.metrics().await;
        assert_eq!(metrics.call_count, 2);
        assert_eq!(metrics.total_bytes, 10);
    }

    #[tokio::test]
    async fn post_uses_same_retry_policy() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(429, Some(0));
        backend.push_json(200, serde_json::json!({"id": 7}));
        let transport = transport_with(backend.clone());

        let form = vec![("request_type".to_string(), "2".to_string())];
        let response = transport.post("/recap-fetch/", &form).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(backend.call_count(), 2);
        assert_eq!(backend.calls()[1].method, "POST");
    }
}
