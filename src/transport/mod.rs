//! Transport adapters connecting clients to [`McpServer`](crate::mcp::McpServer).
//!
//! - [`stdio`]: newline-delimited JSON-RPC on stdin/stdout, one connection
//! - [`sse`]: `GET /sse` stream plus `POST /messages`, one session per stream
//! - [`http`]: streamable HTTP on `/mcp`, sessions keyed by `mcp-session-id`
//!
//! All adapters share one read-only [`ToolRegistry`](crate::mcp::ToolRegistry)
//! and create a fresh protocol server per connection or session.

pub mod http;
pub mod session;
pub mod sse;
pub mod stdio;

use std::io;

use axum::Router;
use tokio::net::TcpListener;

pub use http::{HttpError, HttpState, MCP_SESSION_ID_HEADER};
pub use session::SessionMap;
pub use sse::SseState;
pub use stdio::StdioTransport;

/// Serves `router` on `bind:port` until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(router: Router, bind: &str, port: u16) -> io::Result<()> {
    let listener = TcpListener::bind((bind, port)).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        tracing::warn!("Could not install signal handlers; stop the server with a kill");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[cfg(windows)]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    } else {
        std::future::pending::<()>().await;
    }
}
