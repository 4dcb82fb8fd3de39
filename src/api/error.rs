//! Error types for upstream REST API operations.

use thiserror::Error;

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur while building an API client or calling the API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No per-request credential and no shared fallback token configured.
    #[error("API token is not configured: set {variable} or api.token in the config file")]
    MissingToken {
        /// Environment variable that would supply the token.
        variable: &'static str,
    },

    /// The configured base URL is unusable.
    #[error("Invalid API host '{host}': {message}")]
    InvalidHost {
        /// The rejected host value.
        host: String,
        /// Description of what's wrong.
        message: String,
    },

    /// The token contains bytes that cannot be sent in a header.
    #[error("API token contains characters that are not allowed in an HTTP header")]
    InvalidToken,

    /// The underlying HTTP client could not be constructed.
    #[error("Failed to build HTTP client")]
    ClientBuild {
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP request could not be sent or timed out.
    #[error("Request to {path} failed")]
    Transport {
        /// API path of the failed request.
        path: String,
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with a non-success status.
    #[error("API returned {status} for {path}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// API path of the failed request.
        path: String,
        /// Message extracted from the response body.
        message: String,
    },

    /// The response body was not valid JSON.
    #[error("Failed to decode response from {path}")]
    Decode {
        /// API path of the request.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Creates an invalid host error.
    pub fn invalid_host(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidHost {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a status error.
    pub fn status(status: u16, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns the HTTP status for [`ApiError::Status`] errors.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if the request timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }
}
