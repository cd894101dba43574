//! HTTP client with request pacing and per-request retries.

mod response;
mod user_agent;

pub use response::HttpResponse;
pub use user_agent::{resolve_user_agent, IMPERSONATE_USER_AGENTS, USER_AGENT};

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::rate_limiter::RateLimiter;
use crate::config::Settings;
use crate::retry::{with_retry, IsRetryable, RetryPolicy};

/// Category of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Connection refused/reset, DNS, TLS, body read errors.
    Network,
    /// The server answered with a non-2xx status.
    HttpStatus,
    /// Connect or read timeout.
    Timeout,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::HttpStatus => "HTTP status",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// A request that could not be completed, after retries.
#[derive(Debug, Clone, Error)]
#[error("{kind} error fetching {url}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    /// Status code for `HttpStatus` failures.
    pub status: Option<u16>,
    pub message: String,
}

impl FetchError {
    fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            FetchErrorKind::Timeout
        } else {
            FetchErrorKind::Network
        };
        Self {
            kind,
            url: url.to_string(),
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }

    fn from_status(url: &str, status: StatusCode) -> Self {
        Self {
            kind: FetchErrorKind::HttpStatus,
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: format!("HTTP {}", status),
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self.kind {
            FetchErrorKind::Network | FetchErrorKind::Timeout => true,
            FetchErrorKind::HttpStatus => {
                matches!(self.status, Some(s) if s >= 500 || s == 408 || s == 429)
            }
        }
    }
}

/// HTTP client for one logical caller.
///
/// Cloning shares the connection pool and the pacing state; use
/// [`HttpClient::fork`] for a client that paces independently.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
    referer: Option<String>,
}

impl HttpClient {
    /// Build a client from settings: user agent, extra headers, timeout,
    /// request delay and retry budget.
    pub fn from_settings(settings: &Settings) -> Result<Self, reqwest::Error> {
        let user_agent = resolve_user_agent(settings.user_agent.as_deref());

        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Ignoring invalid header {:?}", name),
            }
        }

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(settings.connection_timeout)
            .connect_timeout(settings.connection_timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::new(settings.request_delay),
            retry: RetryPolicy::from_attempts(settings.retry_attempts, settings.retry_base_delay),
            referer: None,
        })
    }

    /// Replace the rate limiter.
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Set the Referer header for requests.
    pub fn with_referer(mut self, referer: String) -> Self {
        self.referer = Some(referer);
        self
    }

    /// A client sharing this one's connection pool but pacing on its own.
    pub fn fork(&self) -> Self {
        Self {
            client: self.client.clone(),
            rate_limiter: self.rate_limiter.fork(),
            retry: self.retry.clone(),
            referer: self.referer.clone(),
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// GET a URL and read the full body.
    ///
    /// Waits out the request delay once, then retries transient failures
    /// (timeouts, connection errors, 5xx) up to the retry budget. Non-2xx
    /// statuses come back as `FetchErrorKind::HttpStatus`.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.rate_limiter.acquire().await;

        let start = Instant::now();
        let result = with_retry(&self.retry, url, |attempt| self.get_once(url, attempt)).await;
        self.rate_limiter.complete().await;

        match &result {
            Ok(response) => debug!(
                "Fetched {} ({} bytes) in {:.2}s",
                url,
                response.len(),
                start.elapsed().as_secs_f64()
            ),
            Err(e) => debug!("Fetch of {} failed: {}", url, e),
        }
        result
    }

    /// GET a page and decode it as text.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        info!("Fetching URL: {}", url);
        self.get(url).await.map(|r| r.text())
    }

    async fn get_once(&self, url: &str, attempt: u32) -> Result<HttpResponse, FetchError> {
        let mut request = self.client.get(url);
        if let Some(ref referer) = self.referer {
            request = request.header(REFERER, referer);
        }

        debug!(attempt, "GET {}", url);
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(url, status));
        }

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Settings tuned for tests: no pacing, millisecond backoff.
#[cfg(test)]
pub(crate) fn test_client(retry_attempts: u32) -> HttpClient {
    use std::time::Duration;

    let settings = Settings {
        request_delay: Duration::ZERO,
        retry_attempts,
        retry_base_delay: Duration::from_millis(1),
        connection_timeout: Duration::from_secs(5),
        ..Settings::default()
    };
    HttpClient::from_settings(&settings).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_returns_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.4".to_vec()),
            )
            .mount(&server)
            .await;

        let client = test_client(1);
        let response = client.get(&format!("{}/doc", server.uri())).await.unwrap();

        assert_eq!(response.body, b"%PDF-1.4");
        assert!(response.content_type_matches("application/pdf"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_typed_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(3);
        let err = client.get(&format!("{}/missing", server.uri())).await.unwrap_err();

        assert_eq!(err.kind, FetchErrorKind::HttpStatus);
        assert_eq!(err.status, Some(404));
        // 404 is permanent, so no retries
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_budget_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = test_client(3);
        let err = client.get(&format!("{}/busy", server.uri())).await.unwrap_err();

        assert_eq!(err.status, Some(503));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = test_client(2);
        let text = client.get_text(&format!("{}/flaky", server.uri())).await.unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_request_delay_applies_once_per_call_not_per_retry() {
        let server = MockServer::start().await;
        for flaky in ["/first", "/second"] {
            Mock::given(method("GET"))
                .and(path(flaky))
                .respond_with(ResponseTemplate::new(503))
                .up_to_n_times(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let delay = Duration::from_millis(400);
        let settings = Settings {
            request_delay: delay,
            retry_attempts: 2,
            retry_base_delay: Duration::from_millis(1),
            connection_timeout: Duration::from_secs(5),
            ..Settings::default()
        };
        let client = HttpClient::from_settings(&settings).unwrap();

        // Nothing to wait for yet, and the retry after the 503 is not paced
        let start = Instant::now();
        assert_eq!(client.get_text(&format!("{}/first", server.uri())).await.unwrap(), "ok");
        assert!(start.elapsed() < delay);

        // 503 then 200 again: one wait for the call, none for its retry
        let start = Instant::now();
        assert_eq!(client.get_text(&format!("{}/second", server.uri())).await.unwrap(), "ok");
        let elapsed = start.elapsed();
        assert!(elapsed >= delay - Duration::from_millis(50), "elapsed {:?}", elapsed);
        assert!(elapsed < delay * 2, "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let settings = Settings {
            request_delay: Duration::ZERO,
            retry_attempts: 1,
            connection_timeout: Duration::from_millis(50),
            ..Settings::default()
        };
        let client = HttpClient::from_settings(&settings).unwrap();
        let err = client.get(&format!("{}/slow", server.uri())).await.unwrap_err();

        assert_eq!(err.kind, FetchErrorKind::Timeout);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_referer_and_custom_headers_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("referer", "https://portal.example.com/search"))
            .and(header("x-portal", "yes"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = Settings {
            request_delay: Duration::ZERO,
            retry_attempts: 1,
            ..Settings::default()
        };
        settings
            .headers
            .insert("X-Portal".to_string(), "yes".to_string());
        let client = HttpClient::from_settings(&settings)
            .unwrap()
            .with_referer("https://portal.example.com/search".to_string());

        client.get(&format!("{}/x", server.uri())).await.unwrap();
    }
}
