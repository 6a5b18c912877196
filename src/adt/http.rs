//! Raw request/response plumbing beneath the ADT session.
//!
//! [`HttpExchange`] is the seam between the session logic (auth, CSRF
//! handling, retries) and the wire. Production code uses
//! [`ReqwestExchange`]; tests substitute a scripted in-memory exchange.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tracing::debug;

use crate::error::AdtError;

/// A request relative to the server root.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a query parameter only when a value is present.
    pub fn query_opt(self, key: impl Into<String>, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    /// Set a header, replacing any previous value with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the verb changes server state and therefore needs a CSRF token.
    pub fn is_mutating(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }
}

/// A fully buffered response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request and returns the buffered response.
pub trait HttpExchange: Send + Sync {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, AdtError>> + Send;
}

impl<T: HttpExchange> HttpExchange for Arc<T> {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, AdtError>> + Send {
        (**self).execute(request)
    }
}

/// [`HttpExchange`] backed by a reqwest client with a per-operation cookie jar.
pub struct ReqwestExchange {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestExchange {
    /// Build a client for `server`.
    ///
    /// Certificate verification is only relaxed when `strict_ssl` is false.
    pub fn new(server: &str, strict_ssl: bool, timeout: Duration) -> Result<Self, AdtError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .danger_accept_invalid_certs(!strict_ssl)
            .user_agent(concat!("bsp-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdtError::Network(format!("building http client: {e}")))?;

        Ok(Self {
            client,
            base_url: server.trim_end_matches('/').to_string(),
        })
    }
}

impl HttpExchange for ReqwestExchange {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, AdtError> {
        let url = request_url(&self.base_url, &request);
        debug!(method = %request.method, path = %request.path, "sending request");

        let mut builder = self.client.request(request.method.clone(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AdtError::Network(format!("{} {}: {e}", request.method, request.path)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| AdtError::Network(format!("reading response body: {e}")))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Absolute URL with the query string percent-encoded.
///
/// Paths are expected to be encoded already.
fn request_url(base_url: &str, request: &HttpRequest) -> String {
    let mut url = format!("{base_url}{}", request.path);
    for (i, (key, value)) in request.query.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(&urlencoding::encode(key));
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}
