//! Model Context Protocol (MCP) server implementation.
//!
//! This module implements the MCP session lifecycle and tool dispatch over
//! the Streamable HTTP transport, using JSON-RPC 2.0 messages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            MCP Server                            │
//! │                                                                  │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐          │
//! │   │  Transport  │───▶│   Engine    │───▶│   Tools     │          │
//! │   │   (HTTP)    │    │ (dispatch)  │    │ (registry)  │          │
//! │   └─────────────┘    └─────────────┘    └─────────────┘          │
//! │                             │                                    │
//! │                             ▼                                    │
//! │                      ┌─────────────┐    ┌─────────────┐          │
//! │                      │    Store    │───▶│   Session   │          │
//! │                      │ (sessions)  │    │ (lifecycle) │          │
//! │                      └─────────────┘    └─────────────┘          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! Versions 2025-06-18, 2025-03-26 and 2024-11-05 are accepted by default.

pub mod engine;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
pub mod tools;
pub mod transport;
pub mod types;

pub use engine::{Dispatch, EngineSettings, McpEngine, Replies};
pub use protocol::{
    IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse, OutgoingMessage, RequestId,
    LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
pub use server::McpServer;
pub use session::{Session, SessionHandle, SessionId, SessionState};
pub use store::{SessionStore, SweepReport};
pub use tools::{ToolContext, ToolError, ToolHandler, ToolRegistry};
pub use transport::MCP_SESSION_ID_HEADER;
