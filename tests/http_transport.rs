//! Integration tests for the streamable HTTP and SSE transports.
//!
//! The routers are driven in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body, BodyDataStream};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use testops_mcp::credential::current_credential;
use testops_mcp::mcp::ToolRegistry;
use testops_mcp::transport::{http, sse, HttpState, SseState, MCP_SESSION_ID_HEADER};

const BODY_LIMIT: usize = 1 << 20;

fn registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register_raw("echo", "Returns its arguments", json!({}), |args| async move {
        Ok(args)
    });
    registry.register_raw("whoami", "Returns the request credential", json!({}), |_| async {
        Ok(json!(current_credential()))
    });
    Arc::new(registry)
}

fn http_state() -> HttpState {
    HttpState::new(registry(), HeaderValue::from_static("https://app.example"))
}

fn initialize() -> Value {
    json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {"protocolVersion": "2025-03-26", "capabilities": {}}
    })
}

fn post(session: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(id) = session {
        builder = builder.header(MCP_SESSION_ID_HEADER, id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn with_session(method: Method, session: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri("/mcp")
        .header(MCP_SESSION_ID_HEADER, session)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), BODY_LIMIT).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn open_session(app: &Router) -> String {
    let response = app.clone().oneshot(post(None, &initialize())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = response.headers()[MCP_SESSION_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();

    let initialized = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    let response = app.clone().oneshot(post(Some(&id), &initialized)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    id
}

// =============================================================================
// Session lifecycle
// =============================================================================

#[tokio::test]
async fn initialize_creates_session() {
    let state = http_state();
    let app = http::router(state.clone());

    let response = app.clone().oneshot(post(None, &initialize())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(MCP_SESSION_ID_HEADER));

    let body = json_body(response).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(state.sessions().len(), 1);
}

#[tokio::test]
async fn unknown_session_is_rejected_without_state() {
    let state = http_state();
    let app = http::router(state.clone());

    let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
    let response = app.clone().oneshot(post(Some("nope"), &list)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Bad Request:"));
    assert!(body["id"].is_null());
    assert!(state.sessions().is_empty());
}

#[tokio::test]
async fn missing_session_for_non_initialize_is_rejected() {
    let state = http_state();
    let app = http::router(state.clone());

    let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
    let response = app.oneshot(post(None, &list)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(state.sessions().is_empty());
}

#[tokio::test]
async fn failed_initialize_advertises_no_session() {
    let state = http_state();
    let app = http::router(state.clone());

    let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
    let response = app.oneshot(post(None, &init)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key(MCP_SESSION_ID_HEADER));
    assert_eq!(json_body(response).await["error"]["code"], -32602);
    assert!(state.sessions().is_empty());
}

#[tokio::test]
async fn session_reuse_and_tool_call() {
    let app = http::router(http_state());
    let id = open_session(&app).await;

    let call = json!({
        "jsonrpc": "2.0", "id": 3, "method": "tools/call",
        "params": {"name": "echo", "arguments": {"x": 1}}
    });
    let response = app.clone().oneshot(post(Some(&id), &call)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key(MCP_SESSION_ID_HEADER));

    let body = json_body(response).await;
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!({"x": 1}));
}

#[tokio::test]
async fn delete_then_get_is_rejected() {
    let state = http_state();
    let app = http::router(state.clone());
    let id = open_session(&app).await;

    let response = app
        .clone()
        .oneshot(with_session(Method::DELETE, &id))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.sessions().is_empty());

    let response = app
        .clone()
        .oneshot(with_session(Method::GET, &id))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(with_session(Method::DELETE, &id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_opens_event_stream() {
    let app = http::router(http_state());
    let id = open_session(&app).await;

    let response = app.oneshot(with_session(Method::GET, &id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
}

#[tokio::test]
async fn published_messages_reach_event_stream() {
    let state = http_state();
    let app = http::router(state.clone());
    let id = open_session(&app).await;

    let response = app.oneshot(with_session(Method::GET, &id)).await.unwrap();
    let mut body = response.into_body().into_data_stream();

    let session = state.sessions().get(&id).unwrap();
    let notification = json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"});
    assert_eq!(session.publish(notification.to_string()), 1);

    let events = read_events(&mut body, 1).await;
    assert_eq!(events[0].0, "message");
    assert_eq!(serde_json::from_str::<Value>(&events[0].1).unwrap(), notification);
}

// =============================================================================
// Message shapes
// =============================================================================

#[tokio::test]
async fn batch_gets_array_reply() {
    let app = http::router(http_state());
    let id = open_session(&app).await;

    let batch = json!([
        {"jsonrpc": "2.0", "id": "a", "method": "ping"},
        {"jsonrpc": "2.0", "method": "notifications/cancelled", "params": {"requestId": 9}},
        {"jsonrpc": "2.0", "id": "b", "method": "tools/list"}
    ]);
    let response = app.oneshot(post(Some(&id), &batch)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let replies = body.as_array().unwrap();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], "a");
    assert_eq!(replies[1]["result"]["tools"][0]["name"], "echo");
}

#[tokio::test]
async fn malformed_json_is_a_parse_error() {
    let app = http::router(http_state());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], -32700);
}

#[tokio::test]
async fn bearer_token_reaches_handler() {
    let app = http::router(http_state());
    let id = open_session(&app).await;

    let call = json!({
        "jsonrpc": "2.0", "id": 4, "method": "tools/call",
        "params": {"name": "whoami"}
    });
    let mut request = post(Some(&id), &call);
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok-123"));

    let body = json_body(app.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(body["result"]["content"][0]["text"], "\"tok-123\"");

    let body = json_body(app.oneshot(post(Some(&id), &call)).await.unwrap()).await;
    assert_eq!(body["result"]["content"][0]["text"], "\"\"");
}

// =============================================================================
// Health and CORS
// =============================================================================

#[tokio::test]
async fn health_reports_session_count() {
    let app = http::router(http_state());
    open_session(&app).await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["server"], "testops-mcp");
    assert_eq!(body["sessions"], 1);
}

#[tokio::test]
async fn preflight_short_circuits() {
    let app = http::router(http_state());
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/mcp")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example");
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, POST, DELETE, OPTIONS"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_EXPOSE_HEADERS], "mcp-session-id");

    let bytes = to_bytes(response.into_body(), BODY_LIMIT).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn cors_headers_on_errors() {
    let app = http::router(http_state());
    let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
    let response = app.oneshot(post(Some("nope"), &list)).await.unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.example"
    );
}

// =============================================================================
// SSE transport
// =============================================================================

fn sse_state() -> SseState {
    SseState::new(registry(), HeaderValue::from_static("*"))
}

/// Reads SSE frames until `count` data-bearing events were seen.
async fn read_events(stream: &mut BodyDataStream, count: usize) -> Vec<(String, String)> {
    let mut buffer = String::new();
    let mut events = Vec::new();

    while events.len() < count {
        let chunk = stream.next().await.unwrap().unwrap();
        buffer.push_str(std::str::from_utf8(&chunk).unwrap());

        while let Some(end) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..end + 2).collect();
            let mut name = String::new();
            let mut data = String::new();
            for line in frame.lines() {
                if let Some(v) = line.strip_prefix("event: ") {
                    name = v.to_string();
                } else if let Some(v) = line.strip_prefix("data: ") {
                    data = v.to_string();
                }
            }
            if !data.is_empty() {
                events.push((name, data));
            }
        }
    }
    events
}

#[tokio::test]
async fn sse_endpoint_then_messages() {
    let state = sse_state();
    let app = sse::router(state.clone());

    let request = Request::builder().uri("/sse").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.sessions().len(), 1);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    let first = std::str::from_utf8(&first).unwrap().to_string();
    assert!(first.contains("event: endpoint"));
    let endpoint = first
        .lines()
        .find_map(|l| l.strip_prefix("data: "))
        .unwrap()
        .to_string();
    assert!(endpoint.starts_with("/messages?sessionId="));

    let request = Request::builder()
        .method(Method::POST)
        .uri(&endpoint)
        .header(header::AUTHORIZATION, "Bearer sse-token")
        .body(Body::from(initialize().to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let events = read_events(&mut body, 1).await;
    assert_eq!(events[0].0, "message");
    let reply: Value = serde_json::from_str(&events[0].1).unwrap();
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["serverInfo"]["name"], "testops-mcp");
}

#[tokio::test]
async fn sse_session_evicted_when_stream_dropped() {
    let state = sse_state();
    let app = sse::router(state.clone());

    let request = Request::builder().uri("/sse").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(state.sessions().len(), 1);

    drop(response);
    assert!(state.sessions().is_empty());
}

#[tokio::test]
async fn sse_post_returns_when_stream_is_not_read() {
    let state = sse_state();
    let app = sse::router(state.clone());

    let request = Request::builder().uri("/sse").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    let first = std::str::from_utf8(&first).unwrap().to_string();
    let endpoint = first
        .lines()
        .find_map(|l| l.strip_prefix("data: "))
        .unwrap()
        .to_string();

    let mut statuses = Vec::new();
    for i in 0..70 {
        let ping = json!({"jsonrpc": "2.0", "id": i, "method": "ping"});
        let request = Request::builder()
            .method(Method::POST)
            .uri(&endpoint)
            .body(Body::from(ping.to_string()))
            .unwrap();
        let response = tokio::time::timeout(Duration::from_millis(500), app.clone().oneshot(request))
            .await
            .expect("POST blocked on a full event stream")
            .unwrap();
        statuses.push(response.status());
    }

    assert!(statuses[..64].iter().all(|s| *s == StatusCode::ACCEPTED));
    assert!(statuses[64..]
        .iter()
        .all(|s| *s == StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(state.sessions().len(), 1);
    drop(body);
}

#[tokio::test]
async fn sse_unknown_session_is_rejected() {
    let app = sse::router(sse_state());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/messages?sessionId=nope")
        .body(Body::from(initialize().to_string()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/messages")
        .body(Body::from(initialize().to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
