//! Thin JSON client for the upstream test-management REST API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{RequestBuilder, Url};
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};

/// Base URL used when neither the config file nor the environment names one.
pub const DEFAULT_API_HOST: &str = "https://api.testops.io/v1";

/// Header carrying the API token on every upstream request.
pub const TOKEN_HEADER: &str = "token";

/// Longest upstream error body echoed back into an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Where and how to reach the API, independent of who is calling.
#[derive(Debug, Clone)]
pub struct ApiEndpoint {
    base_url: String,
    timeout: Duration,
}

impl ApiEndpoint {
    /// Creates an endpoint from a base URL and per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidHost`] if `base_url` is not an absolute
    /// http(s) URL.
    pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let url = Url::parse(base_url).map_err(|e| ApiError::invalid_host(base_url, e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::invalid_host(base_url, "scheme must be http or https"));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Returns the base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// An API client authenticated with one token.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Builds a client for `endpoint` that authenticates with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value or the
    /// HTTP client cannot be constructed.
    pub fn new(endpoint: &ApiEndpoint, token: &str) -> ApiResult<Self> {
        let mut token_value = HeaderValue::from_str(token).map_err(|_| ApiError::InvalidToken)?;
        token_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(TOKEN_HEADER), token_value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(endpoint.timeout)
            .user_agent(concat!("testops-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ApiError::ClientBuild { source })?;

        Ok(Self {
            http,
            base_url: endpoint.base_url.clone(),
        })
    }

    /// Sends a GET request with optional query parameters.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or an
    /// undecodable body.
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> ApiResult<Value> {
        let request = self.http.get(self.url(path)).query(query);
        self.send(path, request).await
    }

    /// Sends a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::get`].
    pub async fn post(&self, path: &str, body: &Value) -> ApiResult<Value> {
        let request = self.http.post(self.url(path)).json(body);
        self.send(path, request).await
    }

    /// Sends a PATCH request with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::get`].
    pub async fn patch(&self, path: &str, body: &Value) -> ApiResult<Value> {
        let request = self.http.patch(self.url(path)).json(body);
        self.send(path, request).await
    }

    /// Sends a DELETE request.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::get`].
    pub async fn delete(&self, path: &str) -> ApiResult<Value> {
        let request = self.http.delete(self.url(path));
        self.send(path, request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> ApiResult<Value> {
        tracing::debug!(path, "Calling upstream API");

        let response = request.send().await.map_err(|source| ApiError::Transport {
            path: path.to_string(),
            source,
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|source| ApiError::Transport {
            path: path.to_string(),
            source,
        })?;

        if !status.is_success() {
            let message = error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            tracing::debug!(path, status = status.as_u16(), "Upstream API returned an error");
            return Err(ApiError::status(status.as_u16(), path, message));
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body).map_err(|source| ApiError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

/// Pulls a human-readable message out of an error response body.
fn error_message(body: &[u8]) -> Option<String> {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        for key in ["errorMessage", "message", "error"] {
            if let Some(message) = json.get(key).and_then(Value::as_str) {
                return Some(message.to_string());
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.chars().take(MAX_ERROR_BODY_CHARS).collect())
    }
}
