//! Tool registry: the contract tool implementations satisfy and the ordered
//! table the engine dispatches `tools/list` and `tools/call` against.
//!
//! The registry is built with `&mut` access during startup and then shared
//! behind an `Arc`, which makes it read-only for the rest of the process.
//! Concurrent lookups therefore need no locking.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, ToolFailure};
use crate::mcp::protocol::{OutgoingMessage, OutgoingNotification};
use crate::mcp::types::{ToolCallResult, ToolDefinition};

/// Failure reported by a tool handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The arguments did not have the expected shape.
    #[error("{0}")]
    InvalidArguments(String),
    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),
}

/// A callable tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name, description and input schema. Read once at registration.
    fn definition(&self) -> ToolDefinition;

    /// Runs the tool.
    ///
    /// Long-running handlers should watch [`ToolContext::cancellation`] and
    /// return early once it fires.
    async fn call(
        &self,
        arguments: Map<String, Value>,
        ctx: ToolContext,
    ) -> Result<ToolCallResult, ToolError>;
}

/// Deserialises tool arguments into a typed struct.
///
/// # Errors
///
/// Returns [`ToolError::InvalidArguments`] describing the mismatch.
pub fn parse_arguments<T: DeserializeOwned>(arguments: Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Per-call context handed to a [`ToolHandler`].
#[derive(Debug, Clone)]
pub struct ToolContext {
    cancel: CancellationToken,
    progress: Option<ProgressReporter>,
}

#[derive(Debug, Clone)]
struct ProgressReporter {
    token: Value,
    tx: mpsc::Sender<OutgoingMessage>,
}

impl ToolContext {
    /// Context with the given cancellation token and no progress channel.
    #[must_use]
    pub const fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    /// Context for calls made outside the engine, e.g. in tests.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Attaches the push channel that progress notifications are sent on.
    #[must_use]
    pub(crate) fn with_progress(mut self, token: Value, tx: mpsc::Sender<OutgoingMessage>) -> Self {
        self.progress = Some(ProgressReporter { token, tx });
        self
    }

    /// Fires when the caller gave up on the result.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the call has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sends a `notifications/progress` message if the client asked for
    /// progress. A no-op otherwise, or once the client has gone away.
    pub async fn report_progress(&self, progress: u64, total: Option<u64>, message: Option<&str>) {
        let Some(reporter) = &self.progress else {
            return;
        };
        let notification =
            OutgoingNotification::progress(&reporter.token, progress, total, message);
        if reporter.tx.send(notification.into()).await.is_err() {
            tracing::debug!("Progress receiver dropped");
        }
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// Ordered mapping from tool name to definition and handler.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::DuplicateTool`] if the name is already taken.
    pub fn register<T: ToolHandler + 'static>(&mut self, tool: T) -> Result<(), McpError> {
        self.register_arc(Arc::new(tool))
    }

    /// Registers an already shared tool handler.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::DuplicateTool`] if the name is already taken.
    pub fn register_arc(&mut self, handler: Arc<dyn ToolHandler>) -> Result<(), McpError> {
        let definition = handler.definition();
        if self.tools.contains_key(&definition.name) {
            return Err(McpError::DuplicateTool(definition.name));
        }
        tracing::debug!(tool = %definition.name, "Registering tool");
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler,
            },
        );
        Ok(())
    }

    /// Tool definitions in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    /// Invokes a tool by name.
    ///
    /// No deadline is applied here; the caller owns timeouts.
    ///
    /// # Errors
    ///
    /// - [`McpError::ToolNotFound`] for unregistered names
    /// - [`McpError::InvalidArguments`] when the handler rejects the arguments
    /// - [`McpError::ToolExecution`] when the handler fails
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        ctx: ToolContext,
    ) -> Result<ToolCallResult, McpError> {
        let handler = self
            .tools
            .get(name)
            .map(|t| Arc::clone(&t.handler))
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;

        handler.call(arguments, ctx).await.map_err(|e| match e {
            ToolError::InvalidArguments(detail) => McpError::InvalidArguments(detail),
            ToolError::Failed(detail) => McpError::tool(ToolFailure::Failed, detail),
        })
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
