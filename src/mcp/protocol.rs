//! JSON-RPC 2.0 message types for MCP protocol.
//!
//! This module defines the core message types used in the Model Context Protocol.
//! All messages follow the JSON-RPC 2.0 specification with MCP-specific extensions.
//!
//! # Message Types
//!
//! - **Request**: A message expecting a response (has `id`)
//! - **Response**: A reply to a request (success or error)
//! - **Notification**: A one-way message (no `id`, no response expected)
//!
//! # MCP-Specific Constraints
//!
//! - Request IDs must be strings or integers (never `null`)
//! - Request IDs must be unique among a session's outstanding requests
//! - Batches are not supported

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::McpError;

/// Protocol versions this implementation can speak, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// The newest protocol version this implementation supports.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

const JSONRPC_VERSION: &str = "2.0";

/// Serialised when a reply cannot itself be serialised.
const FALLBACK_ERROR: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// A JSON-RPC 2.0 request ID.
///
/// Per the MCP specification, IDs must be strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl RequestId {
    /// Reads an ID from a JSON value, rejecting `null`, floats and structures.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// Every method this server understands.
///
/// Dispatch matches on this exhaustively, so supporting a new method is a
/// compile-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `initialize` request.
    Initialize,
    /// `notifications/initialized` notification.
    Initialized,
    /// `notifications/cancelled` notification.
    Cancelled,
    /// `ping` request.
    Ping,
    /// `tools/list` request.
    ToolsList,
    /// `tools/call` request.
    ToolsCall,
}

impl Method {
    /// Looks up a method by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "initialize" => Self::Initialize,
            "notifications/initialized" => Self::Initialized,
            "notifications/cancelled" => Self::Cancelled,
            "ping" => Self::Ping,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            _ => return None,
        })
    }

    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Initialized => "notifications/initialized",
            Self::Cancelled => "notifications/cancelled",
            Self::Ping => "ping",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
        }
    }

    /// Whether the method is defined as a notification.
    #[must_use]
    pub const fn is_notification(self) -> bool {
        matches!(self, Self::Initialized | Self::Cancelled)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A JSON-RPC 2.0 request message.
///
/// Requests expect a response from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 notification message (incoming).
///
/// Notifications do not have an ID and do not expect a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// An outgoing JSON-RPC 2.0 notification (server to client).
///
/// Used for sending progress updates on a push stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingNotification {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutgoingNotification {
    /// Creates a new outgoing notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    /// Creates a progress notification.
    #[must_use]
    pub fn progress(
        progress_token: &Value,
        progress: u64,
        total: Option<u64>,
        message: Option<&str>,
    ) -> Self {
        let mut params = Map::new();
        params.insert("progressToken".into(), progress_token.clone());
        params.insert("progress".into(), progress.into());
        if let Some(total) = total {
            params.insert("total".into(), total.into());
        }
        if let Some(message) = message {
            params.insert("message".into(), message.into());
        }
        Self::new("notifications/progress", Some(Value::Object(params)))
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcErrorData {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&McpError> for JsonRpcErrorData {
    fn from(error: &McpError) -> Self {
        Self {
            code: error.code(),
            message: error.client_message(),
            data: error.data(),
        }
    }
}

/// A JSON-RPC 2.0 error response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this error corresponds to, `null` when it could not be
    /// determined.
    pub id: Option<RequestId>,

    /// The error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }

    /// Creates an error response from an engine error.
    #[must_use]
    pub fn from_error(id: Option<RequestId>, error: &McpError) -> Self {
        Self::new(id, error.into())
    }
}

/// An incoming message that could be either a request or notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IncomingMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification (no response expected).
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Returns the method name of this message.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(req) => &req.method,
            Self::Notification(notif) => &notif.method,
        }
    }

    /// Returns the parameters of this message.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Option::as_ref is not const
    pub fn params(&self) -> Option<&Value> {
        match self {
            Self::Request(req) => req.params.as_ref(),
            Self::Notification(notif) => notif.params.as_ref(),
        }
    }

    /// Returns the request ID if this is a request.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Notification(_) => None,
        }
    }

    /// Serialises the message back to its wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| FALLBACK_ERROR.as_bytes().to_vec())
    }
}

/// Any message the server emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    /// Successful response.
    Response(JsonRpcResponse),
    /// Error response.
    Error(JsonRpcError),
    /// Server-to-client notification.
    Notification(OutgoingNotification),
}

impl OutgoingMessage {
    /// Whether this message terminates a request (as opposed to a progress
    /// notification sent ahead of it).
    #[must_use]
    pub const fn is_response(&self) -> bool {
        !matches!(self, Self::Notification(_))
    }

    /// The JSON-RPC error code, for error responses.
    #[must_use]
    pub const fn error_code(&self) -> Option<i32> {
        match self {
            Self::Error(err) => Some(err.error.code),
            _ => None,
        }
    }

    /// Serialises the message to a JSON string.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialise outgoing message");
            FALLBACK_ERROR.to_string()
        })
    }
}

impl From<JsonRpcResponse> for OutgoingMessage {
    fn from(value: JsonRpcResponse) -> Self {
        Self::Response(value)
    }
}

impl From<JsonRpcError> for OutgoingMessage {
    fn from(value: JsonRpcError) -> Self {
        Self::Error(value)
    }
}

impl From<OutgoingNotification> for OutgoingMessage {
    fn from(value: OutgoingNotification) -> Self {
        Self::Notification(value)
    }
}

/// Formats a success response.
#[must_use]
pub fn encode_result(id: RequestId, payload: Value) -> Vec<u8> {
    OutgoingMessage::from(JsonRpcResponse::success(id, payload))
        .to_json()
        .into_bytes()
}

/// Formats an error response. Pass `None` for `id` when the originating
/// message could not be correlated.
#[must_use]
pub fn encode_error(
    id: Option<RequestId>,
    code: i32,
    message: impl Into<String>,
    data: Option<Value>,
) -> Vec<u8> {
    let error = JsonRpcErrorData {
        code,
        message: message.into(),
        data,
    };
    OutgoingMessage::from(JsonRpcError::new(id, error))
        .to_json()
        .into_bytes()
}

/// Decodes one JSON-RPC message from raw bytes.
///
/// A message is a request if and only if it has an `id` member.
///
/// # Errors
///
/// Returns a ready-to-send `JsonRpcError`:
/// - parse error (id `null`) when the bytes are not JSON
/// - invalid request when the JSON is not a single JSON-RPC 2.0 message; the
///   id is carried over whenever it could be read
pub fn decode(bytes: &[u8]) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| JsonRpcError::from_error(None, &McpError::ParseError(e.to_string())))?;

    let mut obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => return Err(invalid_request(None, "batching not supported")),
        _ => return Err(invalid_request(None, "message must be a JSON object")),
    };

    // Check if this is a request (has id) or notification (no id)
    let id = match obj.remove("id") {
        None => None,
        Some(raw) => Some(
            RequestId::from_value(&raw)
                .ok_or_else(|| invalid_request(None, "id must be a string or an integer"))?,
        ),
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(invalid_request(id, "jsonrpc field must be \"2.0\""));
    }

    let method = match obj.remove("method") {
        Some(Value::String(m)) if !m.is_empty() => m,
        Some(Value::String(_)) => return Err(invalid_request(id, "method field cannot be empty")),
        _ => return Err(invalid_request(id, "method field must be a string")),
    };

    let params = match obj.remove("params") {
        None => None,
        Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p),
        Some(_) => return Err(invalid_request(id, "params must be an object or an array")),
    };

    let jsonrpc = JSONRPC_VERSION.to_string();
    Ok(match id {
        Some(id) => IncomingMessage::Request(JsonRpcRequest {
            jsonrpc,
            id,
            method,
            params,
        }),
        None => IncomingMessage::Notification(JsonRpcNotification {
            jsonrpc,
            method,
            params,
        }),
    })
}

fn invalid_request(id: Option<RequestId>, message: &str) -> JsonRpcError {
    JsonRpcError::from_error(id, &McpError::InvalidRequest(message.to_string()))
}
