//! Asset fetching.
//!
//! [`HttpFetcher`] reads `http(s)://` URLs with reqwest and `file://` URLs or
//! plain paths from disk. [`StaticFetcher`] serves canned responses from
//! memory for tests and dry runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use storyreel_common::config::{FetchConfig, TimeoutConfig};
use storyreel_common::error::{StoryreelError, StoryreelResult};

/// Cross-origin policy for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Send `Origin` and require the server to allow it.
    Cors,
    /// Plain request; the response is accepted regardless of CORS headers.
    NoCors,
}

/// Source of raw asset bytes.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str, mode: FetchMode) -> StoryreelResult<Bytes>;

    fn name(&self) -> &str;
}

/// Network and filesystem fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
    origin: String,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(fetch: &FetchConfig, timeouts: &TimeoutConfig) -> StoryreelResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(fetch.user_agent.clone())
            .timeout(timeouts.fetch())
            .build()
            .map_err(|e| StoryreelError::config(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            origin: fetch.origin.clone(),
            timeout: timeouts.fetch(),
        })
    }

    async fn fetch_http(&self, url: &str, mode: FetchMode) -> StoryreelResult<Bytes> {
        let mut request = self.client.get(url);
        if mode == FetchMode::Cors {
            request = request.header(reqwest::header::ORIGIN, &self.origin);
        }

        let response = request.send().await.map_err(|e| self.request_error(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoryreelError::fetch(
                url,
                Some(status.as_u16()),
                format!("HTTP {status}"),
            ));
        }

        if mode == FetchMode::Cors {
            let allowed = response
                .headers()
                .get(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == "*" || v == self.origin);
            if !allowed {
                return Err(StoryreelError::fetch(
                    url,
                    None,
                    format!("blocked by CORS policy for origin {}", self.origin),
                ));
            }
        }

        response.bytes().await.map_err(|e| self.request_error(url, e))
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> StoryreelError {
        if e.is_timeout() {
            return StoryreelError::timeout(format!("fetching {url}"), self.timeout);
        }
        StoryreelError::fetch(url, e.status().map(|s| s.as_u16()), e.to_string())
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, mode: FetchMode) -> StoryreelResult<Bytes> {
        tracing::debug!(url, ?mode, "Fetching asset");
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.fetch_http(url, mode).await;
        }

        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoryreelError::FileNotFound { path })
            }
            Err(e) => Err(StoryreelError::fetch(url, None, e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[derive(Debug, Clone)]
enum StaticResponse {
    Body(Bytes),
    Status(u16),
    /// Served only to `NoCors` requests.
    CorsBlocked(Bytes),
    Delayed(Duration, Bytes),
}

/// In-memory fetcher with canned responses. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: Mutex<HashMap<String, StaticResponse>>,
    requests: Mutex<Vec<(String, FetchMode)>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(self, url: impl Into<String>, response: StaticResponse) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(url.into(), response);
        self
    }

    pub fn with_body(self, url: impl Into<String>, body: Bytes) -> Self {
        self.insert(url, StaticResponse::Body(body))
    }

    /// Answer every request for `url` with an HTTP error status.
    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        self.insert(url, StaticResponse::Status(status))
    }

    /// Reject CORS requests for `url` but serve `body` without CORS.
    pub fn with_cors_blocked(self, url: impl Into<String>, body: Bytes) -> Self {
        self.insert(url, StaticResponse::CorsBlocked(body))
    }

    pub fn with_delay(self, url: impl Into<String>, delay: Duration, body: Bytes) -> Self {
        self.insert(url, StaticResponse::Delayed(delay, body))
    }

    /// Every request made so far, in order.
    pub fn requests(&self) -> Vec<(String, FetchMode)> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// How many times `url` was requested.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|(u, _)| u == url).count()
    }
}

#[async_trait]
impl AssetFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, mode: FetchMode) -> StoryreelResult<Bytes> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((url.to_string(), mode));
        let response = self
            .responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(url)
            .cloned();

        match response {
            None => Err(StoryreelError::fetch(url, Some(404), "HTTP 404 Not Found")),
            Some(StaticResponse::Body(body)) => Ok(body),
            Some(StaticResponse::Status(status)) => Err(StoryreelError::fetch(
                url,
                Some(status),
                format!("HTTP {status}"),
            )),
            Some(StaticResponse::CorsBlocked(body)) => match mode {
                FetchMode::NoCors => Ok(body),
                FetchMode::Cors => Err(StoryreelError::fetch(
                    url,
                    None,
                    "blocked by CORS policy",
                )),
            },
            Some(StaticResponse::Delayed(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
        }
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_fetcher_serves_and_records() {
        let fetcher = StaticFetcher::new()
            .with_body("https://cdn/a.png", Bytes::from_static(b"png"))
            .with_status("https://cdn/b.mp4", 500);

        let body = fetcher.fetch("https://cdn/a.png", FetchMode::Cors).await.unwrap();
        assert_eq!(&body[..], b"png");

        let err = fetcher
            .fetch("https://cdn/b.mp4", FetchMode::Cors)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let missing = fetcher
            .fetch("https://cdn/missing.wav", FetchMode::Cors)
            .await
            .unwrap_err();
        assert!(!missing.is_retryable());
        assert_eq!(fetcher.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_cors_blocked_only_serves_no_cors() {
        let fetcher =
            StaticFetcher::new().with_cors_blocked("https://other/x.jpg", Bytes::from_static(b"x"));
        assert!(fetcher.fetch("https://other/x.jpg", FetchMode::Cors).await.is_err());
        assert!(fetcher.fetch("https://other/x.jpg", FetchMode::NoCors).await.is_ok());
        assert_eq!(fetcher.request_count("https://other/x.jpg"), 2);
    }

    #[tokio::test]
    async fn test_http_fetcher_reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narration.wav");
        std::fs::write(&path, b"RIFF").unwrap();

        let fetcher = HttpFetcher::new(&FetchConfig::default(), &TimeoutConfig::default()).unwrap();
        let plain = fetcher
            .fetch(path.to_str().unwrap(), FetchMode::Cors)
            .await
            .unwrap();
        assert_eq!(&plain[..], b"RIFF");

        let url = format!("file://{}", path.display());
        assert_eq!(&fetcher.fetch(&url, FetchMode::Cors).await.unwrap()[..], b"RIFF");

        let missing = fetcher
            .fetch(dir.path().join("nope.wav").to_str().unwrap(), FetchMode::Cors)
            .await
            .unwrap_err();
        assert!(matches!(missing, StoryreelError::FileNotFound { .. }));
    }
}
