//! Server-push (SSE) transport.
//!
//! Each `GET /sse` opens its own session. The first event on the stream is
//! `endpoint`, whose data is the URL the client must POST its messages to
//! (`/messages?sessionId=<id>`). Replies travel back on the stream as
//! `message` events; the POST itself is answered with `202 Accepted`.
//!
//! The session is evicted as soon as the client drops the stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;

use crate::credential::run_with_credential;
use crate::mcp::protocol::parse_message;
use crate::mcp::registry::ToolRegistry;
use crate::mcp::server::McpServer;
use crate::transport::http::{
    cors, health_body, request_credential, HttpError, KEEP_ALIVE_INTERVAL,
};
use crate::transport::session::{new_session_id, EvictOnDrop, SessionMap};

/// Path clients POST their messages to.
pub const MESSAGES_PATH: &str = "/messages";

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// One SSE connection.
#[derive(Debug)]
pub struct SseSession {
    server: McpServer,
    outbound: mpsc::Sender<String>,
}

impl SseSession {
    /// Returns the protocol server bound to this session.
    #[must_use]
    pub const fn server(&self) -> &McpServer {
        &self.server
    }
}

/// Shared state of the SSE router.
#[derive(Clone)]
pub struct SseState {
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionMap<SseSession>>,
    cors_origin: HeaderValue,
}

impl SseState {
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
    pub fn sessions(&self) -> &Arc<SessionMap<SseSession>> {
        &self.sessions
    }
}

/// Builds the `/sse` + `/messages` router with health check and CORS.
pub fn router(state: SseState) -> Router {
    let cors_origin = state.cors_origin.clone();
    Router::new()
        .route("/sse", get(handle_stream))
        .route(MESSAGES_PATH, post(handle_message))
        .route("/health", get(handle_health))
        .with_state(state)
        .layer(middleware::from_fn_with_state(cors_origin, cors))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn handle_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = new_session_id();
    let (outbound, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
    state.sessions.insert(
        id.clone(),
        SseSession {
            server: McpServer::new(Arc::clone(&state.registry)),
            outbound,
        },
    );
    tracing::info!(session_id = %id, "SSE session opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{MESSAGES_PATH}?sessionId={id}"));
    let guard = EvictOnDrop::new(Arc::clone(&state.sessions), id);

    let messages = ReceiverStream::new(rx).map(move |data| {
        let _session = &guard;
        Event::default().event("message").data(data)
    });
    let stream = stream::once(async move { endpoint }).chain(messages).map(Ok);

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

async fn handle_message(
    State(state): State<SseState>,
    Query(query): Query<MessagesQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, HttpError> {
    let id = query
        .session_id
        .ok_or_else(|| HttpError::bad_request("Missing sessionId"))?;
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| HttpError::bad_request("Unknown session ID"))?;

    let text = std::str::from_utf8(&body).map_err(|_| HttpError::parse_error())?;
    let message = parse_message(text).map_err(|e| {
        tracing::warn!(session_id = %id, "Rejected malformed JSON-RPC body");
        HttpError::rejected(e)
    })?;

    let credential = request_credential(&headers);
    let reply = run_with_credential(credential, session.server.handle_message(message)).await;

    if let Some(reply) = reply {
        let data = serde_json::to_string(&reply).map_err(|e| {
            tracing::error!(error = %e, "Failed to serialise JSON-RPC reply");
            HttpError::internal()
        })?;
        // A client that stops reading its stream must not stall this request.
        match session.outbound.try_send(data) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session_id = %id, "Event stream backlog full, reply dropped");
                return Err(HttpError::internal());
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(session_id = %id, "Stream closed before reply was delivered");
            }
        }
    }

    Ok(StatusCode::ACCEPTED)
}

async fn handle_health(State(state): State<SseState>) -> Json<Value> {
    Json(health_body(state.sessions.len()))
}
