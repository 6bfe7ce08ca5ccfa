//! HTTP transport: the only module that performs network I/O.
//!
//! Adapters describe requests as plain [`WireRequest`] data; this module
//! turns them into reqwest calls. Blocking requests run under one total
//! deadline. Streaming requests are only connect-bounded, with an idle
//! timeout applied per chunk read so a stalled stream surfaces as
//! [`ClientError::Timeout`] instead of hanging forever.

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::header::RETRY_AFTER;
use tracing::warn;

use colloquy_config::HttpConfig;

use crate::error::ClientError;

/// HTTP method of a provider request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A provider-built request, free of transport types so adapters can be
/// tested without I/O.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<serde_json::Value>,
}

impl WireRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    /// Attach a bearer credential. Empty keys (unauthenticated local
    /// backends) add no header.
    pub fn bearer(mut self, key: &colloquy_config::ApiKey) -> Self {
        if !key.is_empty() {
            self.headers
                .push(("authorization", format!("Bearer {}", key.expose())));
        }
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// A completed non-streaming response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, when present.
    pub retry_after_secs: Option<u64>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Convert a non-success response into the matching error.
    pub fn into_error(self) -> ClientError {
        ClientError::from_status(self.status, &self.body, self.retry_after_secs)
    }
}

/// Raw body chunks of a streaming response.
///
/// Dropping this mid-stream releases the connection; that is the whole
/// cancellation mechanism.
pub struct ByteStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>,
    idle_timeout: Duration,
}

impl ByteStream {
    /// Read the next chunk. `Ok(None)` means the stream ended cleanly;
    /// exceeding the idle timeout yields [`ClientError::Timeout`].
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ClientError> {
        match tokio::time::timeout(self.idle_timeout, self.inner.next()).await {
            Err(_) => Err(ClientError::Timeout),
            Ok(None) => Ok(None),
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(err))) => Err(err.into()),
        }
    }
}

/// Thin wrapper over a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
    idle_read_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .user_agent(concat!("colloquy/", env!("CARGO_PKG_VERSION")));

        if config.danger_disable_tls_verify {
            warn!(
                "TLS certificate verification is DISABLED; \
                 use only against trusted lab deployments"
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(Self {
            client,
            request_timeout: config.request_timeout(),
            idle_read_timeout: config.idle_read_timeout(),
        })
    }

    /// Run a non-streaming request under the configured total deadline.
    pub async fn execute(&self, request: WireRequest) -> Result<HttpResponse, ClientError> {
        self.execute_with_timeout(request, self.request_timeout)
            .await
    }

    /// Run a non-streaming request under an explicit total deadline
    /// (connectivity probes use a shorter one than chat requests).
    pub async fn execute_with_timeout(
        &self,
        request: WireRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, ClientError> {
        let response = self.builder(request).timeout(timeout).send().await?;
        let status = response.status().as_u16();
        let retry_after_secs = parse_retry_after(response.headers());
        let body = response.text().await?;
        Ok(HttpResponse {
            status,
            body,
            retry_after_secs,
        })
    }

    /// Open a streaming request. A non-success status is turned into an
    /// error here, with whatever body the server attached; on success the
    /// caller owns the chunk stream.
    pub async fn open_stream(&self, request: WireRequest) -> Result<ByteStream, ClientError> {
        let response = self.builder(request).send().await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after_secs = parse_retry_after(response.headers());
            let body = tokio::time::timeout(self.request_timeout, response.text())
                .await
                .map_err(|_| ClientError::Timeout)??;
            return Err(ClientError::from_status(status, &body, retry_after_secs));
        }

        let inner = response.bytes_stream().map(|item| item.map(|b| b.to_vec()));
        Ok(ByteStream {
            inner: Box::pin(inner),
            idle_timeout: self.idle_read_timeout,
        })
    }

    fn builder(&self, request: WireRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_request_builders() {
        let req = WireRequest::get("http://x.example/y").header("accept", "application/json");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.url, "http://x.example/y");
        assert!(req.body.is_none());
        assert_eq!(req.headers, vec![("accept", "application/json".to_string())]);

        let req = WireRequest::post_json("http://x.example/z", serde_json::json!({"a": 1}));
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.body, Some(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_bearer_skips_empty_key() {
        let empty = colloquy_config::ApiKey::default();
        let req = WireRequest::get("http://x.example").bearer(&empty);
        assert!(req.headers.is_empty());

        let key = colloquy_config::ApiKey::new("sk-test");
        let req = WireRequest::get("http://x.example").bearer(&key);
        assert_eq!(
            req.headers,
            vec![("authorization", "Bearer sk-test".to_string())]
        );
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(RETRY_AFTER, "30".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(30));

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);

        assert_eq!(parse_retry_after(&reqwest::header::HeaderMap::new()), None);
    }

    #[test]
    fn test_response_error_conversion() {
        let resp = HttpResponse {
            status: 503,
            body: "overloaded".into(),
            retry_after_secs: None,
        };
        assert!(!resp.is_success());
        assert!(matches!(
            resp.into_error(),
            ClientError::Provider { status: 503, .. }
        ));
    }
}
