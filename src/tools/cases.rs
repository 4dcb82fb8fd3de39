//! Test case tools.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::api::ClientFactory;
use crate::mcp::dispatch::ToolError;
use crate::mcp::registry::ToolRegistry;
use crate::tools::{project_code, Page};

/// Arguments of `list_cases`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListCases {
    /// Project code, e.g. "DEMO".
    pub code: String,

    /// Full-text filter on case titles.
    #[serde(default)]
    pub search: Option<String>,

    /// Only cases in this suite.
    #[serde(default)]
    pub suite_id: Option<u64>,

    #[serde(flatten)]
    pub page: Page,
}

/// Arguments of `get_case`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetCase {
    /// Project code, e.g. "DEMO".
    pub code: String,

    /// Case id within the project.
    pub id: u64,
}

/// Registers the test case tools.
pub fn register(registry: &mut ToolRegistry, clients: &Arc<ClientFactory>) {
    let factory = Arc::clone(clients);
    registry.register(
        "list_cases",
        "List test cases of a project, optionally filtered by title or suite.",
        move |args: ListCases| {
            let factory = Arc::clone(&factory);
            async move { list_cases(&factory, &args).await }
        },
    );

    let factory = Arc::clone(clients);
    registry.register(
        "get_case",
        "Get a single test case.",
        move |args: GetCase| {
            let factory = Arc::clone(&factory);
            async move { get_case(&factory, &args).await }
        },
    );
}

fn case_filters(args: &ListCases) -> Result<Vec<(&'static str, String)>, ToolError> {
    let mut query = args.page.query()?;
    if let Some(search) = args.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query.push(("search", search.to_string()));
    }
    if let Some(suite_id) = args.suite_id {
        query.push(("suite_id", suite_id.to_string()));
    }
    Ok(query)
}

async fn list_cases(factory: &ClientFactory, args: &ListCases) -> Result<Value, ToolError> {
    let code = project_code(&args.code)?;
    let query = case_filters(args)?;
    let client = factory.client()?;
    client.get(&format!("case/{code}"), &query).await.map_err(ToolError::from)
}

async fn get_case(factory: &ClientFactory, args: &GetCase) -> Result<Value, ToolError> {
    let code = project_code(&args.code)?;
    let client = factory.client()?;
    client.get(&format!("case/{code}/{}", args.id), &[]).await.map_err(ToolError::from)
}
