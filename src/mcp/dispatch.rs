//! Tool dispatch and result envelopes.
//!
//! [`Dispatcher::call_tool`] is the one place a handler's outcome is turned
//! into a `tools/call` result:
//!
//! | Handler outcome            | Envelope                                   |
//! |----------------------------|--------------------------------------------|
//! | `Ok(value)`                | pretty-printed JSON text                   |
//! | `ToolError::Execution`     | message (+ suggestion), `isError: true`    |
//! | `ToolError::Unexpected`    | formatted error chain, `isError: true`     |
//!
//! Only an unknown tool name escapes as an error ([`DispatchError`]); the
//! protocol layer turns it into a JSON-RPC error instead of an envelope.

use std::error::Error as StdError;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::api::ApiError;
use crate::mcp::registry::{ToolDefinition, ToolRegistry};

/// Boxed error for failures a handler did not anticipate.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// A recoverable tool failure the caller can act on.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolExecutionError {
    message: String,
    suggestion: Option<String>,
}

impl ToolExecutionError {
    /// Creates an error with a message and no suggestion.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
        }
    }

    /// Attaches a remediation hint.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the suggestion, if any.
    #[must_use]
    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }

    /// Renders the text shown to the caller.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.suggestion {
            Some(suggestion) => format!("{}\n\nSuggestion: {suggestion}", self.message),
            None => self.message.clone(),
        }
    }
}

/// Everything a tool handler can fail with.
#[derive(Debug, Error)]
pub enum ToolError {
    /// An expected operational failure.
    #[error(transparent)]
    Execution(#[from] ToolExecutionError),

    /// Anything else.
    #[error(transparent)]
    Unexpected(BoxError),
}

impl ToolError {
    /// Wraps an arbitrary error as unexpected.
    pub fn unexpected(error: impl Into<BoxError>) -> Self {
        Self::Unexpected(error.into())
    }
}

impl From<ApiError> for ToolError {
    fn from(error: ApiError) -> Self {
        match api_suggestion(&error) {
            Some(suggestion) => ToolExecutionError::new(error.to_string())
                .with_suggestion(suggestion)
                .into(),
            None => Self::unexpected(error),
        }
    }
}

/// Remediation hint for API failures the caller can fix. `None` means the
/// failure is not the caller's to fix.
fn api_suggestion(error: &ApiError) -> Option<&'static str> {
    let suggestion = match error {
        ApiError::MissingToken { .. } => {
            "Configure a shared API token, or send an 'Authorization: Bearer <token>' header."
        }
        ApiError::InvalidHost { .. } => "Check the configured API host URL.",
        ApiError::InvalidToken => "Check that the API token was copied correctly.",
        ApiError::Transport { .. } if error.is_timeout() => {
            "The API did not answer in time. Try again, or narrow the request."
        }
        ApiError::Transport { .. } => "Check network connectivity to the API host.",
        ApiError::Status { status, .. } => match status {
            401 | 403 => "Check that the API token is valid and has access to this resource.",
            404 => "Check that the identifiers (project code, IDs) exist.",
            400 | 422 => "Check the arguments against the tool's input schema.",
            429 => "Rate limit reached. Wait a moment before retrying.",
            500..=599 => "The API is having trouble. Try again later.",
            _ => "Check the request arguments.",
        },
        ApiError::ClientBuild { .. } | ApiError::Decode { .. } => return None,
    };
    Some(suggestion)
}

/// Content item in a tool call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool
const fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Returns the concatenated text of all content items.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Protocol-level dispatch failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No tool is registered under the requested name.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

/// Routes tool calls to registered handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    /// Creates a dispatcher over a shared registry.
    #[must_use]
    pub const fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the registry's tool listing.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.registry.list()
    }

    /// Invokes the tool `name` with raw `arguments`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownTool`] if no such tool is registered.
    /// Handler failures are never returned as errors; they come back as
    /// `isError` results.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, DispatchError> {
        let handler = self
            .registry
            .resolve(name)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;

        tracing::debug!(tool = %name, "Calling tool");

        let result = match handler(arguments).await {
            Ok(value) => ToolCallResult::text(render_value(&value)),
            Err(ToolError::Execution(err)) => {
                tracing::info!(tool = %name, error = %err, "Tool reported an error");
                ToolCallResult::error(err.render())
            }
            Err(ToolError::Unexpected(err)) => {
                let message = format_unexpected(err.as_ref());
                tracing::error!(tool = %name, error = %message, "Tool failed unexpectedly");
                ToolCallResult::error(message)
            }
        };

        Ok(result)
    }
}

/// Pretty-prints a handler's return value.
fn render_value(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Formats an unexpected error with its `source()` chain.
#[must_use]
pub fn format_unexpected(error: &(dyn StdError + 'static)) -> String {
    let mut message = format!("Unexpected error: {error}");
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
