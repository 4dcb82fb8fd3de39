//! Tool registry: names mapped to input contracts and handlers.
//!
//! A tool is registered once at startup with a description, an input
//! contract and an async handler. The contract is an ordinary Rust type
//! deriving [`serde::Deserialize`] and [`schemars::JsonSchema`]; the same type
//! produces the `inputSchema` advertised in `tools/list` and parses the raw
//! arguments before the handler sees them.
//!
//! Registering a name that already exists replaces the previous tool
//! completely (last write wins). The replaced tool keeps its position in the
//! listing order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::IndexMap;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::mcp::dispatch::{ToolError, ToolExecutionError};

/// Boxed future returned by every tool handler.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;

/// A type-erased tool handler taking the raw `arguments` object.
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// A tool definition for the `tools/list` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// One registered tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    definition: ToolDefinition,
    handler: ToolHandler,
}

impl ToolDescriptor {
    /// Returns the protocol-visible definition.
    #[must_use]
    pub const fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Returns the handler.
    #[must_use]
    pub fn handler(&self) -> ToolHandler {
        Arc::clone(&self.handler)
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Registry of all tools exposed by the server.
///
/// Built with `&mut` access at startup, then shared read-only behind an
/// `Arc` by every protocol server instance.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: IndexMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool whose arguments are described and parsed by `A`.
    ///
    /// The handler receives the parsed arguments. Arguments that do not match
    /// the contract are reported back to the caller as a tool execution error
    /// and the handler is not called.
    pub fn register<A, R, F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ToolError>> + Send + 'static,
    {
        let name = name.into();
        let input_schema = schema_for_contract::<A>();
        let handler = Arc::new(handler);
        let tool_name = name.clone();

        let erased: ToolHandler = Arc::new(move |raw: Value| -> ToolFuture {
            let parsed = parse_arguments::<A>(&tool_name, raw);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let output = handler(parsed?).await?;
                serde_json::to_value(output).map_err(|e| ToolError::Unexpected(Box::new(e)))
            })
        });

        self.insert(name, description.into(), input_schema, erased);
    }

    /// Registers a tool with a hand-written input schema and a raw handler.
    ///
    /// The schema is normalised the same way generated ones are: anything
    /// that is not an object schema becomes the empty object schema.
    pub fn register_raw<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let erased: ToolHandler =
            Arc::new(move |raw: Value| -> ToolFuture { Box::pin(handler(raw)) });
        self.insert(
            name.into(),
            description.into(),
            normalise_schema(input_schema),
            erased,
        );
    }

    fn insert(
        &mut self,
        name: String,
        description: String,
        input_schema: Value,
        handler: ToolHandler,
    ) {
        let descriptor = ToolDescriptor {
            definition: ToolDefinition {
                name: name.clone(),
                description,
                input_schema,
            },
            handler,
        };

        if self.tools.insert(name.clone(), descriptor).is_some() {
            tracing::debug!(tool = %name, "Replaced existing tool registration");
        } else {
            tracing::trace!(tool = %name, "Registered tool");
        }
    }

    /// Removes a tool, keeping the order of the others. Returns `true` if it
    /// existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.shift_remove(name).is_some()
    }

    /// Removes every tool.
    pub fn clear(&mut self) {
        self.tools.clear();
    }

    /// Returns all tool definitions in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| tool.definition.clone())
            .collect()
    }

    /// Returns the handler registered under `name`.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<ToolHandler> {
        self.tools.get(name).map(ToolDescriptor::handler)
    }

    /// Returns the full descriptor registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Returns `true` if a tool named `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns tool names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Parses raw tool arguments against the contract type `A`.
///
/// `null` (arguments omitted) is treated as an empty object.
///
/// # Errors
///
/// Returns a [`ToolError::Execution`] describing the mismatch.
pub fn parse_arguments<A: DeserializeOwned>(tool: &str, raw: Value) -> Result<A, ToolError> {
    let raw = if raw.is_null() {
        Value::Object(Map::new())
    } else {
        raw
    };

    serde_json::from_value(raw).map_err(|e| {
        ToolExecutionError::new(format!("Invalid arguments for tool '{tool}': {e}"))
            .with_suggestion("Check the tool's input schema for required fields and types.")
            .into()
    })
}

/// Produces the protocol-visible input schema for contract type `A`.
///
/// Nested types are inlined, metadata keys are dropped, and non-object
/// contracts fall back to the empty object schema.
#[must_use]
pub fn schema_for_contract<A: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
        s.option_add_null_type = false;
        s.option_nullable = false;
    });
    let root = settings.into_generator().into_root_schema_for::<A>();

    match serde_json::to_value(root) {
        Ok(value) => normalise_schema(value),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialise input schema, using empty object");
            empty_object_schema()
        }
    }
}

/// The schema advertised for tools without a usable contract.
#[must_use]
pub fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Reduces a schema to the object-shaped form MCP clients expect.
#[must_use]
pub fn normalise_schema(schema: Value) -> Value {
    let Value::Object(mut obj) = schema else {
        return empty_object_schema();
    };

    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return empty_object_schema();
    }

    for key in ["$schema", "title", "definitions", "$defs"] {
        obj.remove(key);
    }

    if !obj.get("properties").is_some_and(Value::is_object) {
        obj.insert("properties".to_string(), Value::Object(Map::new()));
    }

    Value::Object(obj)
}
