//! Streamable HTTP transport for MCP server.
//!
//! One endpoint path serves the whole protocol:
//!
//! - `POST`: body is one JSON-RPC message
//!   - notifications are answered with `202 Accepted` and no body
//!   - requests are answered with an SSE stream (`event: message`) when the
//!     client accepts `text/event-stream`, otherwise with one
//!     `application/json` document
//! - `DELETE`: terminates the session named by `Mcp-Session-Id`
//! - `GET`: `405`, there is no standalone server-initiated stream
//!
//! The session identifier travels in the `Mcp-Session-Id` header. It is set
//! on the `initialize` response and must be echoed on every later message.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;

use crate::error::codes;
use crate::mcp::engine::{Dispatch, McpEngine};
use crate::mcp::protocol::OutgoingMessage;

/// Header carrying the session identifier. Header names are case-insensitive.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// SSE event name for JSON-RPC messages.
const SSE_MESSAGE_EVENT: &str = "message";

const EVENT_STREAM: &str = "text/event-stream";

#[derive(Clone)]
struct HttpState {
    engine: Arc<McpEngine>,
    json_response: bool,
}

/// Builds the MCP endpoint router.
///
/// The endpoint answers on `path` and on `path` with a trailing slash.
pub fn router(engine: Arc<McpEngine>, path: &str, json_response: bool) -> Router {
    let state = HttpState {
        engine,
        json_response,
    };

    let mut app = Router::new().route(path, post(http_post).delete(http_delete).get(http_get));
    let with_slash = format!("{}/", path.trim_end_matches('/'));
    if with_slash != path {
        app = app.route(
            &with_slash,
            post(http_post).delete(http_delete).get(http_get),
        );
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn http_post(State(st): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    let session_id = header_str(&headers, MCP_SESSION_ID_HEADER);
    let dispatch = st.engine.dispatch(&body, session_id).await;

    if !dispatch.expects_reply() {
        return StatusCode::ACCEPTED.into_response();
    }

    let not_found = dispatch.immediate_error_code() == Some(codes::SESSION_NOT_FOUND);
    let stream = !not_found && !st.json_response && accepts_event_stream(&headers);
    let Dispatch {
        session_id: new_session,
        replies,
    } = dispatch;

    let mut response = if stream {
        let events = replies.map(|message| {
            Ok::<_, Infallible>(
                Event::default()
                    .event(SSE_MESSAGE_EVENT)
                    .data(message.to_json()),
            )
        });
        Sse::new(events).into_response()
    } else {
        match replies.final_response().await {
            Some(message) => json_response(&message),
            None => StatusCode::ACCEPTED.into_response(),
        }
    };

    if not_found {
        *response.status_mut() = StatusCode::NOT_FOUND;
    }

    if let Some(id) = new_session {
        match HeaderValue::from_str(id.as_str()) {
            Ok(value) => {
                response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
            }
            Err(e) => tracing::error!(error = %e, "Session identifier is not a valid header value"),
        }
    }

    response
}

async fn http_delete(State(st): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(id) = header_str(&headers, MCP_SESSION_ID_HEADER) else {
        return (StatusCode::BAD_REQUEST, "missing mcp-session-id").into_response();
    };

    if st.engine.close_session(id) {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::NOT_FOUND, "unknown mcp-session-id").into_response()
    }
}

async fn http_get() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        "server-initiated streams are not supported",
    )
}

fn json_response(message: &OutgoingMessage) -> Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        message.to_json(),
    )
        .into_response()
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains(EVENT_STREAM))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
