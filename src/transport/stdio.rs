//! stdio transport for the MCP server.
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! A stdio connection never carries a request credential, so every tool call
//! uses the shared fallback client.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::mcp::protocol::{OutgoingMessage, OutgoingNotification};
use crate::mcp::server::McpServer;

/// A line-oriented MCP transport, by default over stdin and stdout.
pub struct StdioTransport<R = BufReader<tokio::io::Stdin>, W = tokio::io::Stdout> {
    reader: R,
    writer: W,
}

impl StdioTransport {
    /// Creates a transport over the process stdin and stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::from_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a transport over arbitrary buffered input and output.
    pub const fn from_io(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Consumes the transport and returns the writer.
    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Reads the next message line.
    ///
    /// Returns `None` if input is closed (EOF).
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        Ok(Some(line))
    }

    /// Writes a response or error object.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_message(&mut self, message: &OutgoingMessage) -> io::Result<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.write_raw(&json).await
    }

    /// Writes a server-initiated notification.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_notification(
        &mut self,
        notification: &OutgoingNotification,
    ) -> io::Result<()> {
        let json = serde_json::to_string(notification)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.write_raw(&json).await
    }

    async fn write_raw(&mut self, json: &str) -> io::Result<()> {
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Serves `server` until EOF or a shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    #[cfg(unix)]
    pub async fn serve(&mut self, server: &McpServer) -> io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(io::Error::other)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(io::Error::other)?;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                    server.shutdown();
                    return Ok(());
                }

                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    server.shutdown();
                    return Ok(());
                }

                line_result = self.read_line() => {
                    if self.handle_transport_result(server, line_result).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Serves `server` until EOF or Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    #[cfg(windows)]
    pub async fn serve(&mut self, server: &McpServer) -> io::Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                    server.shutdown();
                    return Ok(());
                }

                line_result = self.read_line() => {
                    if self.handle_transport_result(server, line_result).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Handles the result from a transport read.
    ///
    /// Returns `true` if the loop should stop.
    async fn handle_transport_result(
        &mut self,
        server: &McpServer,
        line_result: io::Result<Option<String>>,
    ) -> io::Result<bool> {
        let Some(line) = line_result? else {
            tracing::debug!("stdin closed");
            server.shutdown();
            return Ok(true);
        };

        if line.trim().is_empty() {
            return Ok(false);
        }

        if let Some(reply) = server.handle_line(&line).await {
            self.write_message(&reply).await?;
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::*;
    use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse, RequestId};
    use crate::mcp::registry::ToolRegistry;
    use crate::mcp::server::ServerState;

    fn lines(output: &[u8]) -> Vec<Value> {
        std::str::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn transport_default() {
        let _transport = StdioTransport::default();
    }

    #[tokio::test]
    async fn read_line_strips_crlf() {
        let mut transport = StdioTransport::from_io(&b"first\r\nsecond\n"[..], Vec::new());
        assert_eq!(transport.read_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(transport.read_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(transport.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn messages_are_single_lines() {
        let mut transport = StdioTransport::from_io(&b""[..], Vec::new());
        let response = JsonRpcResponse::success(
            RequestId::Number(1),
            json!({"message": "hello world", "nested": {"key": "value"}}),
        );
        transport.write_message(&response.into()).await.unwrap();
        let error = JsonRpcError::method_not_found(RequestId::Number(2), "test/method");
        transport.write_message(&error.into()).await.unwrap();

        let written = lines(&transport.into_writer());
        assert_eq!(written.len(), 2);
        assert_eq!(written[1]["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn notification_has_no_id() {
        let mut transport = StdioTransport::from_io(&b""[..], Vec::new());
        transport
            .write_notification(&OutgoingNotification::tools_list_changed())
            .await
            .unwrap();

        let written = lines(&transport.into_writer());
        assert_eq!(written[0]["method"], "notifications/tools/list_changed");
        assert!(written[0].get("id").is_none());
    }

    #[tokio::test]
    async fn serve_answers_until_eof() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
            "not json\n",
        );
        let server = McpServer::new(Arc::new(ToolRegistry::new()));
        let mut transport = StdioTransport::from_io(input.as_bytes(), Vec::new());

        transport.serve(&server).await.unwrap();

        let written = lines(&transport.into_writer());
        assert_eq!(written.len(), 3);
        assert_eq!(written[0]["id"], 1);
        assert_eq!(written[1]["result"]["tools"], json!([]));
        assert_eq!(written[2]["error"]["code"], -32700);
        assert_eq!(server.state(), ServerState::ShuttingDown);
    }
}
