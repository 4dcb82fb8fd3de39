//! Project tools.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::api::ClientFactory;
use crate::mcp::dispatch::ToolError;
use crate::mcp::registry::ToolRegistry;
use crate::tools::{project_code, Page};

/// Arguments of `list_projects`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListProjects {
    #[serde(flatten)]
    pub page: Page,
}

/// Arguments of `get_project`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetProject {
    /// Project code, e.g. "DEMO".
    pub code: String,
}

/// Registers the project tools.
pub fn register(registry: &mut ToolRegistry, clients: &Arc<ClientFactory>) {
    let factory = Arc::clone(clients);
    registry.register(
        "list_projects",
        "List projects visible to the API token.",
        move |args: ListProjects| {
            let factory = Arc::clone(&factory);
            async move { list_projects(&factory, &args).await }
        },
    );

    let factory = Arc::clone(clients);
    registry.register(
        "get_project",
        "Get a project by its code.",
        move |args: GetProject| {
            let factory = Arc::clone(&factory);
            async move { get_project(&factory, &args).await }
        },
    );
}

async fn list_projects(factory: &ClientFactory, args: &ListProjects) -> Result<Value, ToolError> {
    let query = args.page.query()?;
    let client = factory.client()?;
    client.get("project", &query).await.map_err(ToolError::from)
}

async fn get_project(factory: &ClientFactory, args: &GetProject) -> Result<Value, ToolError> {
    let code = project_code(&args.code)?;
    let client = factory.client()?;
    client.get(&format!("project/{code}"), &[]).await.map_err(ToolError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::registry::schema_for_contract;

    #[test]
    fn list_schema_is_flat() {
        let schema = schema_for_contract::<ListProjects>();
        assert!(schema["properties"]["limit"].is_object());
        assert!(schema["properties"]["offset"].is_object());
        assert!(schema.get("required").map_or(true, |r| r.as_array().unwrap().is_empty()));
    }

    #[test]
    fn get_schema_requires_code() {
        let schema = schema_for_contract::<GetProject>();
        assert_eq!(schema["required"], serde_json::json!(["code"]));
    }
}
