//! Integration tests for the Streamable HTTP endpoint.
//!
//! Requests are driven through the axum router with `tower::ServiceExt::oneshot`,
//! so no socket is bound.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use mcp_simple_server::config::Config;
use mcp_simple_server::error::codes;
use mcp_simple_server::mcp::{McpServer, MCP_SESSION_ID_HEADER};
use mcp_simple_server::tools::builtin_registry;

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

fn app_with(config: Config) -> Router {
    McpServer::new(config, builtin_registry().unwrap()).router()
}

fn app() -> Router {
    app_with(Config::default())
}

fn post(path: &str, body: &Value, session: Option<&str>, accept: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, accept);
    if let Some(session) = session {
        builder = builder.header("Mcp-Session-Id", session);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Parses the `data:` lines of an SSE body into JSON values.
fn sse_messages(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

fn initialize_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": { "name": "curl", "version": "8.x" }
        }
    })
}

/// Runs the handshake and returns the session identifier.
async fn handshake(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(post("/mcp", &initialize_request(), None, "application/json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = response
        .headers()
        .get(MCP_SESSION_ID_HEADER)
        .expect("initialize sets the session header")
        .to_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(post(
            "/mcp",
            &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            Some(&session),
            ACCEPT_BOTH,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(body_text(response).await.is_empty());

    session
}

#[tokio::test]
async fn initialize_sets_session_header() {
    let app = app();
    let response = app
        .oneshot(post("/mcp", &initialize_request(), None, "application/json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let session = response.headers().get(MCP_SESSION_ID_HEADER).unwrap();
    assert_eq!(session.len(), 32);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );

    let body = body_json(response).await;
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
}

#[tokio::test]
async fn demo_client_flow_over_sse() {
    let app = app();
    let session = handshake(&app).await;

    let response = app
        .clone()
        .oneshot(post(
            "/mcp/",
            &json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/list" }),
            Some(&session),
            ACCEPT_BOTH,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let body = body_text(response).await;
    assert!(body.contains("event: message"));
    let messages = sse_messages(&body);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["result"]["tools"][0]["name"], "echo");

    let response = app
        .oneshot(post(
            "/mcp/",
            &json!({
                "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                "params": { "name": "echo", "arguments": { "text": "Hello World!" } }
            }),
            Some(&session),
            ACCEPT_BOTH,
        ))
        .await
        .unwrap();
    let messages = sse_messages(&body_text(response).await);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], 4);
    assert_eq!(messages[0]["result"]["content"][0]["text"], "Hello World!");
}

#[tokio::test]
async fn json_response_mode_ignores_event_stream_accept() {
    let mut config = Config::default();
    config.http.json_response = true;
    let app = app_with(config);
    let session = handshake(&app).await;

    let response = app
        .oneshot(post(
            "/mcp",
            &json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }),
            Some(&session),
            ACCEPT_BOTH,
        ))
        .await
        .unwrap();

    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(body_json(response).await["result"], json!({}));
}

#[tokio::test]
async fn unknown_session_is_404_with_jsonrpc_body() {
    let app = app();
    let response = app
        .oneshot(post(
            "/mcp",
            &json!({ "jsonrpc": "2.0", "id": 7, "method": "tools/list" }),
            Some("ffffffffffffffffffffffffffffffff"),
            ACCEPT_BOTH,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["id"], 7);
    assert_eq!(body["error"]["code"], codes::SESSION_NOT_FOUND);
}

#[tokio::test]
async fn notification_without_session_is_still_accepted() {
    let app = app();
    let response = app
        .oneshot(post(
            "/mcp",
            &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            None,
            ACCEPT_BOTH,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn malformed_body_gets_parse_error() {
    let app = app();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], Value::Null);
    assert_eq!(body["error"]["code"], codes::PARSE_ERROR);
}

#[tokio::test]
async fn delete_terminates_session() {
    let app = app();
    let session = handshake(&app).await;

    let delete = |session: Option<&str>| {
        let mut builder = Request::builder().method("DELETE").uri("/mcp");
        if let Some(session) = session {
            builder = builder.header(MCP_SESSION_ID_HEADER, session);
        }
        builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(delete(Some(&session))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(delete(Some(&session))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.clone().oneshot(delete(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post(
            "/mcp",
            &json!({ "jsonrpc": "2.0", "id": 8, "method": "ping" }),
            Some(&session),
            "application/json",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_is_not_allowed() {
    let app = app();
    let request = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
