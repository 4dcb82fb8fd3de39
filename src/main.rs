//! testops-mcp: MCP server exposing a test-management REST API as tools
//!
//! Serves the tools over stdio (default), SSE or streamable HTTP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use axum::http::HeaderValue;
use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use testops_mcp::api::ClientFactory;
use testops_mcp::config::{self, Config};
use testops_mcp::mcp::{McpServer, ToolRegistry};
use testops_mcp::tools;
use testops_mcp::transport::{self, HttpState, SseState, StdioTransport};

/// MCP server exposing a test-management REST API as AI-assistant tools.
#[derive(Parser, Debug)]
#[command(name = "testops-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Transport to serve
    #[arg(short, long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Listen port for the sse and http transports (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// `GET /sse` event stream with `POST /messages`
    Sse,
    /// Streamable HTTP on `/mcp`
    Http,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Builds the tool registry shared by every connection.
fn build_registry(cfg: &Config) -> Arc<ToolRegistry> {
    let clients = Arc::new(ClientFactory::new(cfg.api.clone()));
    let mut registry = ToolRegistry::new();
    tools::register_all(&mut registry, &clients);
    Arc::new(registry)
}

async fn run(args: &Args, cfg: &Config, registry: Arc<ToolRegistry>) -> std::io::Result<()> {
    if args.transport == Transport::Stdio {
        let server = McpServer::new(registry);
        info!("MCP server ready on stdio, waiting for client connection...");
        return StdioTransport::new().serve(&server).await;
    }

    let cors_origin = HeaderValue::from_str(&cfg.server.cors_origin)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let port = args.port.unwrap_or(cfg.server.port);

    let router = match args.transport {
        Transport::Sse => transport::sse::router(SseState::new(registry, cors_origin)),
        Transport::Http | Transport::Stdio => {
            transport::http::router(HttpState::new(registry, cors_origin))
        }
    };

    info!(transport = ?args.transport, port, "Starting HTTP listener");
    transport::serve(router, &cfg.server.bind, port).await
}

/// Entry point for the testops-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig was read from: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    eprintln!(
        "testops-mcp {}  Copyright (C) 2026  The TestOps MCP Authors",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("This program comes with ABSOLUTELY NO WARRANTY.");
    eprintln!("This is free software, licensed under GPL-3.0-or-later.");
    eprintln!();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?args.transport,
        "Starting testops-mcp server"
    );

    let registry = build_registry(&cfg);
    info!(tools = registry.len(), "Tool registry built");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    match runtime.block_on(run(&args, &cfg, registry)) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn transport_flag() {
        let args = Args::try_parse_from(["testops-mcp", "--transport", "http", "--port", "8080"])
            .unwrap();
        assert_eq!(args.transport, Transport::Http);
        assert_eq!(args.port, Some(8080));

        let args = Args::try_parse_from(["testops-mcp"]).unwrap();
        assert_eq!(args.transport, Transport::Stdio);
    }

    #[test]
    fn log_level_precedence() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(2, false, "error"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "info"), Level::INFO);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
    }
}
