//! # ArtVibe Net
//!
//! HTTP request/response types and the network port used by the offline
//! gateway.
//!
//! ## Design Goals
//!
//! 1. **Narrow port**: the gateway only ever sees [`Fetcher`]
//! 2. **Owned responses**: bodies are fully buffered [`Bytes`] so a response
//!    can be cloned into the cache and returned to the page
//! 3. **No hidden policy**: no retries, and no timeout unless one is configured

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use artvibe_common::ArtVibeError;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for ArtVibeError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::InvalidUrl(url) => ArtVibeError::InvalidArgument(url),
            other => ArtVibeError::network_with_source("fetch failed", other),
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// An outbound request as seen by the gateway.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::with_method(Method::GET, url)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        let mut request = Self::with_method(Method::POST, url);
        request.body = Some(body);
        request
    }

    /// Create a request with an arbitrary method.
    pub fn with_method(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Parse `url` and create a GET request.
    pub fn parse_get(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Retrieval methods have no side effects and may be cached.
    pub fn is_retrieval(&self) -> bool {
        self.method == Method::GET
    }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Create an empty response.
    pub fn new(url: Url, status: StatusCode) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get content-type from headers.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// The network as seen by the gateway.
///
/// An `Err` means no response arrived at all (offline, DNS, connect, timeout).
/// HTTP error statuses are `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Loader configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout. `None` leaves it to the HTTP stack.
    pub default_timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("ArtVibeGateway/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: None,
            max_redirects: 10,
        }
    }
}

/// [`Fetcher`] backed by a `reqwest` client.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        if let Some(timeout) = config.default_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await.map_err(|e| classify(e, request))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(|e| classify(e, request))?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}

fn classify(err: reqwest::Error, request: &Request) -> NetError {
    if err.is_timeout() {
        NetError::Timeout(request.timeout.unwrap_or_default())
    } else if err.is_connect() {
        NetError::ConnectionFailed(err.to_string())
    } else {
        NetError::HttpError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://artvibestudio.store/style.css").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("text/css"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert!(request.is_retrieval());
    }

    #[test]
    fn test_post_is_not_retrieval() {
        let url = Url::parse("https://artvibestudio.store/api/orders").unwrap();
        let request = Request::post(url, Bytes::from_static(b"{}"));
        assert!(!request.is_retrieval());
        assert!(request.body.is_some());
    }

    #[test]
    fn test_parse_get_rejects_garbage() {
        assert!(matches!(
            Request::parse_get("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("ArtVibeGateway/"));
        assert!(config.default_timeout.is_none());
    }

    #[test]
    fn test_net_error_into_common() {
        let err: ArtVibeError = NetError::ConnectionFailed("refused".into()).into();
        assert_eq!(err.category(), "network");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_http_fetcher_returns_body_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>shell</html>", "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let request = Request::parse_get(&format!("{}/index.html", server.uri())).unwrap();
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type(), Some("text/html"));
        assert_eq!(response.text().unwrap(), "<html>shell</html>");
    }

    #[tokio::test]
    async fn test_http_fetcher_error_status_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let request = Request::parse_get(&format!("{}/missing.webp", server.uri())).unwrap();
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_http_fetcher_unreachable_host_is_err() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let request = Request::parse_get(&format!("http://127.0.0.1:{port}/")).unwrap();
        assert!(fetcher.fetch(&request).await.is_err());
    }
}
