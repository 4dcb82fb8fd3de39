//! Model Context Protocol (MCP) server implementation.
//!
//! Exposes registered tools to AI assistants over JSON-RPC 2.0. The pieces
//! are transport agnostic; [`crate::transport`] wires them to stdio and HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       MCP Server                             │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌──────────────┐     │
//! │   │  Transport  │───▶│  McpServer  │───▶│  Dispatcher  │     │
//! │   │ stdio / sse │    │ (lifecycle) │    │  (envelopes) │     │
//! │   │   / http    │    └─────────────┘    └──────┬───────┘     │
//! │   └─────────────┘                              ▼             │
//! │                                         ┌──────────────┐     │
//! │                                         │ ToolRegistry │     │
//! │                                         └──────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! Targets MCP 2025-03-26 and also accepts 2024-11-05.

pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod server;

pub use dispatch::{Dispatcher, ToolCallResult, ToolError, ToolExecutionError};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use registry::{ToolDefinition, ToolRegistry};
pub use server::McpServer;
