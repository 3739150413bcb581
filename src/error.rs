//! Error types for mcp-simple-server.
//!
//! Two families live here:
//!
//! - [`ConfigError`] for loading and validating the configuration file.
//! - [`McpError`] for everything the dispatch engine can reject. Each variant
//!   maps onto a JSON-RPC error code via [`McpError::code`], so the engine can
//!   turn any failure into a well-formed error response.

use std::path::PathBuf;

use serde_json::{json, Value};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// JSON-RPC error codes used on the wire.
///
/// The first five are reserved by JSON-RPC 2.0. Everything else sits in the
/// implementation-defined server range (-32000 to -32099).
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i32 = -32603;

    /// A tool handler reported a failure.
    pub const TOOL_EXECUTION_FAILED: i32 = -32000;
    /// A tool handler exceeded its deadline.
    pub const TOOL_TIMED_OUT: i32 = -32001;
    /// A tool handler was cancelled before completing.
    pub const TOOL_CANCELLED: i32 = -32002;
    /// No tool is registered under the requested name.
    pub const TOOL_NOT_FOUND: i32 = -32003;
    /// The session identifier is unknown or has been evicted.
    pub const SESSION_NOT_FOUND: i32 = -32010;
    /// The session exists but has been closed.
    pub const SESSION_CLOSED: i32 = -32011;
}

/// How a tool invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFailure {
    /// The handler returned an error.
    Failed,
    /// The handler ran past the configured deadline.
    TimedOut,
    /// The call was cancelled by the client or because the connection went away.
    Cancelled,
    /// The handler panicked or otherwise faulted unexpectedly.
    Fault,
}

impl ToolFailure {
    /// Short machine-readable label, used in error `data`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::TimedOut => "timeout",
            Self::Cancelled => "cancelled",
            Self::Fault => "tool_fault",
        }
    }
}

/// Every failure the protocol engine can surface to a client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    /// Body was not valid JSON.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Message shape is not a valid JSON-RPC 2.0 request, or the request is
    /// illegal in the current session state.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No handler exists for the method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Parameters were missing or malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// No live session matches the supplied identifier.
    #[error("session not found")]
    SessionNotFound,

    /// The session has been closed and accepts no further messages.
    #[error("session closed")]
    SessionClosed,

    /// A tool with this name is already registered.
    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    /// No tool with this name is registered.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The tool handler rejected the shape of its arguments.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran but did not produce a result.
    #[error("tool execution {}: {message}", kind.as_str())]
    ToolExecution {
        /// Failure sub-kind.
        kind: ToolFailure,
        /// Detail reported by the handler or the engine.
        message: String,
    },

    /// A freshly generated session identifier collided with a live one.
    #[error("duplicate session identifier")]
    DuplicateSessionId,

    /// Anything else that went wrong inside the server.
    #[error("internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Creates a tool execution error of the given kind.
    pub fn tool(kind: ToolFailure, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            kind,
            message: message.into(),
        }
    }

    /// Returns the JSON-RPC error code for this error.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::ParseError(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) | Self::InvalidArguments(_) => codes::INVALID_PARAMS,
            Self::SessionNotFound => codes::SESSION_NOT_FOUND,
            Self::SessionClosed => codes::SESSION_CLOSED,
            Self::ToolNotFound(_) => codes::TOOL_NOT_FOUND,
            Self::ToolExecution { kind, .. } => match kind {
                ToolFailure::Failed => codes::TOOL_EXECUTION_FAILED,
                ToolFailure::TimedOut => codes::TOOL_TIMED_OUT,
                ToolFailure::Cancelled => codes::TOOL_CANCELLED,
                ToolFailure::Fault => codes::INTERNAL_ERROR,
            },
            Self::DuplicateTool(_) | Self::DuplicateSessionId | Self::Internal(_) => {
                codes::INTERNAL_ERROR
            }
        }
    }

    /// Returns the structured `data` member for the error object, if any.
    ///
    /// Internal failures deliberately carry no detail.
    #[must_use]
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::InvalidArguments(detail) => Some(json!({
                "kind": "invalid_arguments",
                "detail": detail,
            })),
            Self::ToolNotFound(name) => Some(json!({ "tool": name })),
            Self::ToolExecution { kind, message } => Some(json!({
                "kind": kind.as_str(),
                "detail": message,
            })),
            _ => None,
        }
    }

    /// Message sent to the client in the error object.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::DuplicateSessionId | Self::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/config.json"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("config.json"));
    }

    #[test]
    fn validation_error_display() {
        let error = ConfigError::ValidationError {
            message: "invalid setting".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("invalid setting"));
    }

    #[test]
    fn standard_codes() {
        assert_eq!(McpError::ParseError("x".into()).code(), -32700);
        assert_eq!(McpError::InvalidRequest("x".into()).code(), -32600);
        assert_eq!(McpError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(McpError::InvalidParams("x".into()).code(), -32602);
        assert_eq!(McpError::Internal("x".into()).code(), -32603);
    }

    #[test]
    fn tool_codes_stay_in_server_range() {
        for kind in [
            ToolFailure::Failed,
            ToolFailure::TimedOut,
            ToolFailure::Cancelled,
        ] {
            let code = McpError::tool(kind, "boom").code();
            assert!((-32099..=-32000).contains(&code), "{code}");
        }
        assert!((-32099..=-32000).contains(&McpError::ToolNotFound("x".into()).code()));
        assert!((-32099..=-32000).contains(&McpError::SessionNotFound.code()));
        assert!((-32099..=-32000).contains(&McpError::SessionClosed.code()));
    }

    #[test]
    fn fault_is_internal() {
        let err = McpError::tool(ToolFailure::Fault, "handler panicked");
        assert_eq!(err.code(), codes::INTERNAL_ERROR);
        assert_eq!(err.data().unwrap()["kind"], "tool_fault");
    }

    #[test]
    fn internal_detail_is_hidden() {
        let err = McpError::Internal("lock poisoned at engine.rs:42".into());
        assert_eq!(err.client_message(), "Internal error");
        assert!(err.data().is_none());
    }

    #[test]
    fn timeout_display_mentions_kind() {
        let err = McpError::tool(ToolFailure::TimedOut, "exceeded 30s");
        assert!(err.to_string().contains("timeout"));
        assert_eq!(err.data().unwrap()["detail"], "exceeded 30s");
    }
}
