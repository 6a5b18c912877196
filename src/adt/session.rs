//! Authenticated, CSRF-protected ADT session.
//!
//! One [`AdtSession`] lives for exactly one deploy operation. It:
//! - attaches basic auth, `sap-client` and `sap-language` to every request
//! - fetches the CSRF token lazily before the first mutating request
//! - reuses that token for the rest of the operation
//! - on token rejection refetches once and retries the request once

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::http::{HttpExchange, HttpRequest, HttpResponse};
use crate::config::{ConnectionContext, Credentials};
use crate::error::AdtError;

/// Safe endpoint used to obtain a CSRF token.
pub const CSRF_FETCH_PATH: &str = "/sap/bc/adt/discovery";

const CSRF_HEADER: &str = "x-csrf-token";

/// Per-operation ADT session over an [`HttpExchange`].
pub struct AdtSession<E> {
    exchange: E,
    client: Option<String>,
    language: Option<String>,
    authorization: String,
    token: Mutex<Option<String>>,
}

impl<E: HttpExchange> AdtSession<E> {
    pub fn new(exchange: E, connection: &ConnectionContext, credentials: &Credentials) -> Self {
        let raw = format!("{}:{}", credentials.user, credentials.password);
        Self {
            exchange,
            client: connection.client.clone(),
            language: None,
            authorization: format!("Basic {}", STANDARD.encode(raw)),
            token: Mutex::new(None),
        }
    }

    /// Tag every request with `sap-language`.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Send a request, returning any response that is not an auth failure.
    ///
    /// Callers decide what to do with non-2xx statuses; see
    /// [`AdtSession::send_ok`] for the common case.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AdtError> {
        let request = self.decorate(request);

        if !request.is_mutating() {
            let response = self.exchange.execute(request).await?;
            return reject_unauthorized(response);
        }

        let token = self.current_token().await?;
        let response = self
            .exchange
            .execute(request.clone().header(CSRF_HEADER, token.as_str()))
            .await?;
        if !is_token_rejection(&response) {
            return reject_unauthorized(response);
        }

        warn!(
            method = %request.method,
            path = %request.path,
            "CSRF token rejected, refetching once"
        );
        let fresh = self.refresh_token(&token).await?;
        let retry = self
            .exchange
            .execute(request.header(CSRF_HEADER, fresh.as_str()))
            .await?;
        if is_token_rejection(&retry) {
            return Err(AdtError::Authentication {
                status: retry.status,
                detail: "CSRF token rejected after refresh".to_string(),
            });
        }
        reject_unauthorized(retry)
    }

    /// Send a request and turn any non-2xx status into [`AdtError::Remote`].
    pub async fn send_ok(&self, request: HttpRequest) -> Result<HttpResponse, AdtError> {
        let method = request.method.to_string();
        let path = request.path.clone();
        let response = self.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(remote_error(&method, &path, &response))
        }
    }

    fn decorate(&self, request: HttpRequest) -> HttpRequest {
        let mut request = request.header("Authorization", self.authorization.as_str());
        if let Some(client) = &self.client
            && request.query_value("sap-client").is_none()
        {
            request = request.query("sap-client", client.as_str());
        }
        if let Some(language) = &self.language
            && request.query_value("sap-language").is_none()
        {
            request = request.query("sap-language", language.as_str());
        }
        request
    }

    async fn current_token(&self) -> Result<String, AdtError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.fetch_token().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Replace `stale` with a freshly fetched token.
    ///
    /// Concurrent callers that saw the same stale token share one refetch.
    async fn refresh_token(&self, stale: &str) -> Result<String, AdtError> {
        let mut guard = self.token.lock().await;
        if let Some(current) = guard.as_ref()
            && current != stale
        {
            return Ok(current.clone());
        }
        let token = self.fetch_token().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<String, AdtError> {
        debug!(path = CSRF_FETCH_PATH, "fetching CSRF token");
        let request = self
            .decorate(HttpRequest::get(CSRF_FETCH_PATH))
            .header(CSRF_HEADER, "Fetch")
            .header("Accept", "*/*");
        let response = reject_unauthorized(self.exchange.execute(request).await?)?;
        if !response.is_success() {
            return Err(remote_error("GET", CSRF_FETCH_PATH, &response));
        }
        response
            .header(CSRF_HEADER)
            .map(str::trim)
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("required"))
            .map(str::to_string)
            .ok_or_else(|| AdtError::protocol(CSRF_FETCH_PATH, "response carried no CSRF token"))
    }
}

fn is_token_rejection(response: &HttpResponse) -> bool {
    response.status == 403
        && (response
            .header(CSRF_HEADER)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("required"))
            || response.text().contains("CSRF token validation failed"))
}

fn reject_unauthorized(response: HttpResponse) -> Result<HttpResponse, AdtError> {
    if response.status == 401 {
        return Err(AdtError::Authentication {
            status: 401,
            detail: "credentials rejected".to_string(),
        });
    }
    Ok(response)
}

/// Describe an unexpected response as a [`AdtError::Remote`].
pub fn remote_error(method: &str, path: &str, response: &HttpResponse) -> AdtError {
    AdtError::Remote {
        method: method.to_string(),
        path: path.to_string(),
        status: response.status,
        body: response.text().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_rejection_detection() {
        let required = HttpResponse::new(403).with_header("X-CSRF-Token", "Required");
        assert!(is_token_rejection(&required));

        let by_body = HttpResponse::new(403).with_body("CSRF token validation failed");
        assert!(is_token_rejection(&by_body));

        let plain_forbidden = HttpResponse::new(403).with_body("no authorization for S_ADT_RES");
        assert!(!is_token_rejection(&plain_forbidden));

        let ok = HttpResponse::new(200).with_header("X-CSRF-Token", "Required");
        assert!(!is_token_rejection(&ok));
    }

    #[test]
    fn test_unauthorized_is_authentication_error() {
        let err = reject_unauthorized(HttpResponse::new(401)).unwrap_err();
        assert!(matches!(err, AdtError::Authentication { status: 401, .. }));
        assert!(reject_unauthorized(HttpResponse::new(404)).is_ok());
    }

    #[test]
    fn test_remote_error_carries_status_and_body() {
        let err = remote_error(
            "POST",
            "/sap/bc/adt/cts/transports",
            &HttpResponse::new(500).with_body("  dump  "),
        );
        assert_eq!(
            err.to_string(),
            "POST /sap/bc/adt/cts/transports failed with HTTP 500: dump"
        );
    }
}
