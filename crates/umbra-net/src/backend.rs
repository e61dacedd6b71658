//! Pluggable HTTP transport.
//!
//! Clients in this crate speak to a [`Backend`] rather than to reqwest
//! directly, so tests run against [`MockBackend`] with scripted responses
//! and no network.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{NetError, Result};

/// HTTP method subset the clients use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A request ready for a [`Backend`] to execute.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// A POST with a JSON body and content type.
    pub fn post_json<T: Serialize>(url: impl Into<String>, body: &T) -> Result<Self> {
        Ok(Self {
            method: Method::Post,
            url: url.into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: serde_json::to_vec(body)?,
        })
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header with the given name, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A raw response: status plus body bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as text for error reporting. Lossy on invalid UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Executes HTTP requests. Implemented by [`HttpBackend`] for production and
/// [`MockBackend`] for tests.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

// ---------------------------------------------------------------------------
// Production backend
// ---------------------------------------------------------------------------

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-based backend with rustls and a fixed request timeout.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("umbra/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Mock backend
// ---------------------------------------------------------------------------

/// Scripted backend for tests: queued responses are returned in order and
/// every executed request is recorded for inspection.
#[derive(Default)]
pub struct MockBackend {
    responses: Mutex<VecDeque<Result<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response.
    pub fn push_response(&self, status: u16, body: impl Into<Vec<u8>>) {
        lock(&self.responses).push_back(Ok(HttpResponse {
            status,
            body: body.into(),
        }));
    }

    /// Queue a JSON response.
    pub fn push_json<T: Serialize>(&self, status: u16, body: &T) {
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        self.push_response(status, bytes);
    }

    /// Queue an error outcome (e.g. a simulated transport failure).
    pub fn push_error(&self, error: NetError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// Requests executed so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        lock(&self.requests).push(request);
        lock(&self.responses).pop_front().unwrap_or(Ok(HttpResponse {
            status: 404,
            body: b"no scripted response".to_vec(),
        }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_replays_responses_in_order() {
        let mock = MockBackend::new();
        mock.push_response(200, b"first".to_vec());
        mock.push_response(500, b"second".to_vec());

        let first = mock.execute(HttpRequest::get("http://x/a")).await.unwrap();
        assert_eq!(first.status, 200);
        assert!(first.is_success());

        let second = mock.execute(HttpRequest::get("http://x/b")).await.unwrap();
        assert_eq!(second.status, 500);
        assert!(!second.is_success());

        // Exhausted queue falls back to 404.
        let third = mock.execute(HttpRequest::get("http://x/c")).await.unwrap();
        assert_eq!(third.status, 404);

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].url, "http://x/a");
    }

    #[tokio::test]
    async fn mock_replays_errors() {
        let mock = MockBackend::new();
        mock.push_error(NetError::ClockOutOfSync);

        let result = mock.execute(HttpRequest::get("http://x")).await;
        assert!(matches!(result, Err(NetError::ClockOutOfSync)));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let request = HttpRequest::get("http://x").header("X-Umbra-Pubkey", "ab");
        assert_eq!(request.header_value("x-umbra-pubkey"), Some("ab"));
        assert_eq!(request.header_value("missing"), None);
    }
}
