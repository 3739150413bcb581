//! mcp-simple-server: a Model Context Protocol server over Streamable HTTP
//!
//! Clients negotiate a session with `initialize`, keep it across HTTP
//! requests via the `Mcp-Session-Id` header, list the registered tools and
//! call them. Replies come back as a single JSON document or as a
//! server-sent event stream.
//!
//! # Modules
//!
//! - [`config`] — Configuration loading and validation
//! - [`error`] — Error types
//! - [`mcp`] — MCP protocol, sessions, dispatch and HTTP transport
//! - [`tools`] — Built-in tools

pub mod config;
pub mod error;
pub mod mcp;
pub mod tools;
