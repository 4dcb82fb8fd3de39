//! testops-mcp: MCP server exposing a test-management REST API as tools
//!
//! AI assistants reach the API through a small set of tools. The same tools
//! are served over stdio to a single local client, or over HTTP to many
//! remote clients, each calling the API with their own token.
//!
//! # Architecture
//!
//! - **Registry**: tool names mapped to typed input contracts and handlers
//! - **Dispatcher**: runs handlers and turns their outcome into MCP results
//! - **Credential scope**: carries a caller's bearer token through a request
//!   so handlers pick the right API client without passing it around
//! - **Transports**: stdio, SSE and streamable HTTP
//!
//! # Modules
//!
//! - [`api`] — REST API client and per-request client factory
//! - [`config`] — Configuration loading and validation
//! - [`credential`] — Request-scoped credential propagation
//! - [`error`] — Error types
//! - [`mcp`] — MCP protocol implementation
//! - [`tools`] — Tools registered at startup
//! - [`transport`] — stdio, SSE and HTTP adapters

pub mod api;
pub mod config;
pub mod credential;
pub mod error;
pub mod mcp;
pub mod tools;
pub mod transport;
