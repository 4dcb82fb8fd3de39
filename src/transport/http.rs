//! Streamable HTTP transport.
//!
//! A single `/mcp` endpoint carries the whole protocol:
//!
//! - `POST` delivers one JSON-RPC message or a batch. A POST without an
//!   `mcp-session-id` header must contain `initialize`; it creates a session
//!   whose id comes back in the `mcp-session-id` response header.
//! - `GET` opens an SSE stream for server-initiated messages of a session.
//! - `DELETE` ends a session.
//!
//! Every POST runs inside a credential scope built from its
//! `Authorization: Bearer` header, so tool handlers talk to the upstream API
//! as the caller.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::credential::{bearer_token, run_with_credential};
use crate::mcp::protocol::{
    parse_value, IncomingMessage, JsonRpcError, OutgoingMessage, SERVER_NAME,
};
use crate::mcp::registry::ToolRegistry;
use crate::mcp::server::{McpServer, ServerState};
use crate::transport::session::{new_session_id, SessionMap};

/// Header carrying the session id in both directions.
pub const MCP_SESSION_ID_HEADER: HeaderName = HeaderName::from_static("mcp-session-id");

/// Interval between SSE keep-alive comments.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One streamable HTTP session.
#[derive(Debug)]
pub struct HttpSession {
    id: String,
    server: McpServer,
    events: broadcast::Sender<String>,
}

impl HttpSession {
    fn new(id: String, registry: Arc<ToolRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id,
            server: McpServer::new(registry),
            events,
        }
    }

    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the protocol server bound to this session.
    #[must_use]
    pub const fn server(&self) -> &McpServer {
        &self.server
    }

    /// Pushes a serialised server-initiated message (a notification or a
    /// server request) to every open GET stream of the session.
    ///
    /// POST replies never travel this way. Returns the number of streams
    /// that received it.
    pub fn publish(&self, message: String) -> usize {
        self.events.send(message).unwrap_or(0)
    }
}

/// Shared state of the streamable HTTP router.
#[derive(Clone)]
pub struct HttpState {
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionMap<HttpSession>>,
    cors_origin: HeaderValue,
}

impl HttpState {
    /// Creates router state over a shared registry.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, cors_origin: HeaderValue) -> Self {
        Self {
            registry,
            sessions: Arc::new(SessionMap::new()),
            cors_origin,
        }
    }

    /// Returns the session map.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionMap<HttpSession>> {
        &self.sessions
    }

    fn session_from(&self, headers: &HeaderMap) -> Result<Arc<HttpSession>, HttpError> {
        let id = session_header(headers)?
            .ok_or_else(|| HttpError::bad_request("No valid session ID provided"))?;
        self.sessions
            .get(id)
            .ok_or_else(|| HttpError::bad_request("Unknown session ID"))
    }
}

/// Builds the `/mcp` router with health check and CORS.
pub fn router(state: HttpState) -> Router {
    let cors_origin = state.cors_origin.clone();
    Router::new()
        .route("/mcp", get(handle_get).post(handle_post).delete(handle_delete))
        .route("/health", get(handle_health))
        .with_state(state)
        .layer(middleware::from_fn_with_state(cors_origin, cors))
}

/// A transport-level failure rendered as a JSON-RPC error body.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    body: JsonRpcError,
}

impl HttpError {
    /// 400 with a `-32000` "Bad Request" error.
    pub fn bad_request(message: impl AsRef<str>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: JsonRpcError::server_error(format!("Bad Request: {}", message.as_ref())),
        }
    }

    /// 400 with a `-32700` parse error.
    #[must_use]
    pub fn parse_error() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: JsonRpcError::parse_error(),
        }
    }

    /// 400 carrying an arbitrary JSON-RPC error.
    #[must_use]
    pub const fn rejected(body: JsonRpcError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body,
        }
    }

    /// 500 with a generic internal error.
    #[must_use]
    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: JsonRpcError::internal_error(None, "Internal server error"),
        }
    }

    /// Returns the HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Adds CORS headers to every response and answers preflight requests.
pub async fn cors(State(origin): State<HeaderValue>, request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization, mcp-session-id"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("mcp-session-id"),
    );
    response
}

/// Body of the `/health` endpoint.
#[must_use]
pub fn health_body(sessions: usize) -> Value {
    json!({
        "status": "ok",
        "server": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": sessions,
    })
}

async fn handle_health(State(state): State<HttpState>) -> Json<Value> {
    Json(health_body(state.sessions.len()))
}

/// Extracts the bearer credential of a request (empty when absent).
pub fn request_credential(headers: &HeaderMap) -> String {
    bearer_token(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    )
}

fn session_header(headers: &HeaderMap) -> Result<Option<&str>, HttpError> {
    headers
        .get(&MCP_SESSION_ID_HEADER)
        .map(|v| {
            v.to_str()
                .map_err(|_| HttpError::bad_request("Invalid session ID header"))
        })
        .transpose()
}

async fn handle_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Rejected malformed JSON-RPC body");
        HttpError::parse_error()
    })?;

    let (items, is_batch) = match payload {
        Value::Array(items) => (items, true),
        other => (vec![other], false),
    };
    if items.is_empty() {
        return Err(HttpError::bad_request("Empty batch"));
    }

    let mut messages = Vec::with_capacity(items.len());
    let mut replies = Vec::new();
    for item in items {
        match parse_value(item) {
            Ok(message) => messages.push(message),
            Err(error) => replies.push(OutgoingMessage::from(error)),
        }
    }

    let (session, mut created) = match session_header(&headers)? {
        Some(id) => {
            let session = state
                .sessions
                .get(id)
                .ok_or_else(|| HttpError::bad_request("Unknown session ID"))?;
            (session, false)
        }
        None if messages.iter().any(IncomingMessage::is_initialize_request) => {
            let id = new_session_id();
            let session = state
                .sessions
                .insert(id.clone(), HttpSession::new(id, Arc::clone(&state.registry)));
            tracing::info!(session_id = %session.id, "Session created");
            (session, true)
        }
        None => return Err(HttpError::bad_request("No valid session ID provided")),
    };

    let credential = request_credential(&headers);
    let handled = run_with_credential(credential, async {
        let mut out = Vec::new();
        for message in messages {
            if let Some(reply) = session.server.handle_message(message).await {
                out.push(reply);
            }
        }
        out
    })
    .await;
    replies.extend(handled);

    if created && session.server.state() == ServerState::AwaitingInit {
        state.sessions.remove(&session.id);
        created = false;
        tracing::debug!(session_id = %session.id, "Initialisation failed, session dropped");
    }

    if replies.is_empty() {
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    let body = if is_batch {
        serde_json::to_value(&replies)
    } else {
        serde_json::to_value(&replies[0])
    }
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to serialise JSON-RPC reply");
        HttpError::internal()
    })?;

    if created {
        Ok((
            StatusCode::OK,
            [(MCP_SESSION_ID_HEADER, session.id.clone())],
            Json(body),
        )
            .into_response())
    } else {
        Ok((StatusCode::OK, Json(body)).into_response())
    }
}

async fn handle_get(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HttpError> {
    let session = state.session_from(&headers)?;
    tracing::debug!(session_id = %session.id, "Opened server event stream");

    let stream = BroadcastStream::new(session.events.subscribe()).filter_map(|message| async move {
        match message {
            Ok(data) => Some(Ok(Event::default().event("message").data(data))),
            Err(e) => {
                tracing::warn!(error = %e, "Server event stream lagged");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

async fn handle_delete(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<StatusCode, HttpError> {
    let session = state.session_from(&headers)?;
    state.sessions.remove(&session.id);
    session.server.shutdown();
    tracing::info!(session_id = %session.id, "Session closed");
    Ok(StatusCode::OK)
}
