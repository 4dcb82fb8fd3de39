//! Per-connection MCP protocol server.
//!
//! This module implements the MCP server lifecycle:
//!
//! 1. **Initialisation**: Capability negotiation and version agreement
//! 2. **Operation**: Handling tool calls and other requests
//! 3. **Shutdown**: Connection termination
//!
//! An [`McpServer`] is bound to exactly one connection: the stdio transport
//! owns one, and the HTTP transports create a fresh one per session. All
//! instances share the same read-only [`ToolRegistry`].
//!
//! [`McpServer::handle_message`] takes `&self`; lifecycle state sits behind a
//! short-lived lock that is never held across a tool call, so overlapping
//! requests on one session do not block each other.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp::dispatch::{DispatchError, Dispatcher};
use crate::mcp::protocol::{
    negotiate_version, parse_message, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, OutgoingMessage, RequestId,
    INITIALIZE_METHOD, SERVER_NAME,
};
use crate::mcp::registry::ToolRegistry;

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolCapabilities::default()),
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug)]
struct Lifecycle {
    state: ServerState,
    protocol_version: Option<String>,
    client: Option<ClientInfo>,
}

/// An MCP protocol server bound to one connection.
pub struct McpServer {
    dispatcher: Dispatcher,
    lifecycle: Mutex<Lifecycle>,
}

impl McpServer {
    /// Creates a server over the shared tool registry.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry),
            lifecycle: Mutex::new(Lifecycle {
                state: ServerState::AwaitingInit,
                protocol_version: None,
                client: None,
            }),
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.lifecycle.lock().state
    }

    /// Returns the negotiated protocol version, once initialised.
    #[must_use]
    pub fn protocol_version(&self) -> Option<String> {
        self.lifecycle.lock().protocol_version.clone()
    }

    /// Returns the name the client reported during initialisation.
    #[must_use]
    pub fn client_name(&self) -> Option<String> {
        self.lifecycle
            .lock()
            .client
            .as_ref()
            .map(|c| c.name.clone())
    }

    /// Marks the connection as shutting down.
    pub fn shutdown(&self) {
        self.lifecycle.lock().state = ServerState::ShuttingDown;
    }

    /// Parses and handles a single line of input.
    ///
    /// Parse failures produce an error response; notifications produce
    /// nothing.
    pub async fn handle_line(&self, line: &str) -> Option<OutgoingMessage> {
        match parse_message(line) {
            Ok(msg) => self.handle_message(msg).await,
            Err(error) => Some(error.into()),
        }
    }

    /// Handles a parsed incoming message.
    ///
    /// Returns the reply for requests and `None` for notifications and
    /// client responses.
    pub async fn handle_message(&self, msg: IncomingMessage) -> Option<OutgoingMessage> {
        match msg {
            IncomingMessage::Request(req) => Some(self.handle_request(req).await),
            IncomingMessage::Notification(ref notif) => {
                self.handle_notification(notif);
                None
            }
            IncomingMessage::Response(resp) => {
                tracing::debug!(id = %resp.id, "Ignoring client response");
                None
            }
        }
    }

    /// Handles an incoming request.
    async fn handle_request(&self, req: JsonRpcRequest) -> OutgoingMessage {
        let response = match req.method.as_str() {
            INITIALIZE_METHOD => self.handle_initialize(&req),
            "tools/list" => self.handle_tools_list(&req),
            "tools/call" => self.handle_tools_call(&req).await,
            "ping" => Ok(Self::handle_ping(&req)),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        match response {
            Ok(resp) => resp.into(),
            Err(error) => error.into(),
        }
    }

    /// Handles an incoming notification.
    fn handle_notification(&self, notif: &JsonRpcNotification) {
        let mut lifecycle = self.lifecycle.lock();
        match notif.method.as_str() {
            "notifications/initialized" if lifecycle.state == ServerState::Initialising => {
                lifecycle.state = ServerState::Running;
            }
            method => tracing::trace!(method, "Ignoring notification"),
        }
    }

    /// Handles the initialize request.
    fn handle_initialize(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        let params: InitializeParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Invalid initialize params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcError::invalid_params(req.id.clone(), "Missing initialize params")
            })?;

        let negotiated_version = negotiate_version(&params.protocol_version);

        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != ServerState::AwaitingInit {
                return Err(JsonRpcError::invalid_request_with(
                    Some(req.id.clone()),
                    "Server already initialised",
                ));
            }

            lifecycle.protocol_version = Some(negotiated_version.to_string());
            lifecycle.client = params.client_info;
            lifecycle.state = ServerState::Initialising;
        }

        tracing::info!(
            protocol_version = negotiated_version,
            client = self.client_name().as_deref().unwrap_or("unknown"),
            "Client initialised"
        );

        let result = json!({
            "protocolVersion": negotiated_version,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": ServerInfo::default(),
        });

        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    /// Handles the tools/list request.
    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_initialised(&req.id)?;

        let result = json!({
            "tools": self.dispatcher.list_tools(),
        });

        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    /// Handles the tools/call request.
    async fn handle_tools_call(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_initialised(&req.id)?;

        let params: ToolCallParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Invalid tool call params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcError::invalid_params(req.id.clone(), "Missing tool call params")
            })?;

        let result = self
            .dispatcher
            .call_tool(&params.name, params.arguments)
            .await
            .map_err(|e| match e {
                DispatchError::UnknownTool(ref name) => {
                    tracing::warn!(tool = %name, "Client called an unknown tool");
                    JsonRpcError::new(
                        Some(req.id.clone()),
                        JsonRpcErrorData::with_message(ErrorCode::InvalidParams, e.to_string())
                            .with_data(json!({ "tool": name })),
                    )
                }
            })?;

        let result_value = serde_json::to_value(&result).map_err(|e| {
            tracing::error!(error = %e, "Failed to serialise tool call result");
            JsonRpcError::internal_error(
                Some(req.id.clone()),
                "Internal error: failed to serialise result",
            )
        })?;

        Ok(JsonRpcResponse::success(req.id.clone(), result_value))
    }

    /// Handles the ping request.
    fn handle_ping(req: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(req.id.clone(), json!({}))
    }

    /// Ensures `initialize` has been handled.
    fn require_initialised(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        match self.state() {
            ServerState::Initialising | ServerState::Running => Ok(()),
            ServerState::AwaitingInit => Err(JsonRpcError::invalid_request_with(
                Some(id.clone()),
                "Server not initialised",
            )),
            ServerState::ShuttingDown => Err(JsonRpcError::invalid_request_with(
                Some(id.clone()),
                "Server is shutting down",
            )),
        }
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
