//! Tools exposing the test-management API.
//!
//! Each handler resolves its API client through [`ClientFactory::client`],
//! so the same tool serves stdio callers (shared token) and HTTP callers
//! (their own bearer token) without knowing which is which.

pub mod cases;
pub mod projects;

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::api::ClientFactory;
use crate::mcp::dispatch::ToolExecutionError;
use crate::mcp::registry::ToolRegistry;

/// Largest page size the API accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Registers every tool in this module.
pub fn register_all(registry: &mut ToolRegistry, clients: &Arc<ClientFactory>) {
    projects::register(registry, clients);
    cases::register(registry, clients);
    tracing::debug!(count = registry.len(), "Tools registered");
}

/// Pagination shared by list tools.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct Page {
    /// Maximum number of entities to return (1-100).
    #[serde(default)]
    pub limit: Option<u32>,

    /// Number of entities to skip.
    #[serde(default)]
    pub offset: Option<u32>,
}

impl Page {
    /// Converts the page into query pairs, rejecting out-of-range limits.
    ///
    /// # Errors
    ///
    /// Returns an execution error when `limit` is outside 1-100.
    pub fn query(&self) -> Result<Vec<(&'static str, String)>, ToolExecutionError> {
        let mut query = Vec::new();
        if let Some(limit) = self.limit {
            if !(1..=MAX_PAGE_SIZE).contains(&limit) {
                return Err(ToolExecutionError::new(format!(
                    "limit must be between 1 and {MAX_PAGE_SIZE}, got {limit}"
                ))
                .with_suggestion("Use a smaller page and page through results with offset."));
            }
            query.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            query.push(("offset", offset.to_string()));
        }
        Ok(query)
    }
}

/// Validates a project code and returns it upper-cased.
///
/// # Errors
///
/// Returns an execution error for empty or non-alphanumeric codes.
pub fn project_code(code: &str) -> Result<String, ToolExecutionError> {
    let code = code.trim();
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(
            ToolExecutionError::new(format!("Invalid project code '{code}'"))
                .with_suggestion("Project codes are short alphanumeric strings such as 'DEMO'."),
        );
    }
    Ok(code.to_ascii_uppercase())
}
