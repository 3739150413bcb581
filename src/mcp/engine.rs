//! Protocol dispatch.
//!
//! [`McpEngine::dispatch`] takes one raw JSON-RPC message plus the session
//! identifier the transport extracted, and yields the replies to send back.
//! It knows nothing about HTTP.
//!
//! Requests on the same session take effect in arrival order: each waits for
//! the session's turn before touching state. A `tools/call` keeps the turn
//! until its handler finishes, so the next request on that session observes
//! its effects. `notifications/cancelled` skips the queue so it can reach the
//! call it targets.
//!
//! The cost is that a `ping` or `tools/list` on a session waits behind that
//! session's running tool, cancellation grace included.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{McpError, ToolFailure};
use crate::mcp::protocol::{
    self, IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    Method, OutgoingMessage, RequestId, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::session::{SessionHandle, SessionId, SessionState};
use crate::mcp::store::SessionStore;
use crate::mcp::tools::{ToolContext, ToolRegistry};
use crate::mcp::types::{
    CancelledParams, InitializeParams, InitializeResult, ServerCapabilities, ServerInfo,
    ToolCallParams, ToolCallResult,
};

/// Room for progress notifications queued ahead of a `tools/call` response.
const REPLY_BUFFER: usize = 16;

/// How long a cancelled or timed-out handler may keep running.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Engine settings that do not belong to the session store.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Reported in the `initialize` result.
    pub server_info: ServerInfo,
    /// Optional usage hints for clients.
    pub instructions: Option<String>,
    /// Protocol versions accepted in `initialize`.
    pub supported_versions: Vec<String>,
    /// Deadline for one `tools/call`.
    pub tool_timeout: Duration,
}

impl EngineSettings {
    /// Extracts engine settings from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            server_info: ServerInfo::named(&config.name),
            instructions: config.instructions.clone(),
            supported_versions: config.protocol.supported_versions.clone(),
            tool_timeout: config.tools.call_timeout(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            server_info: ServerInfo::named(crate::config::DEFAULT_SERVER_NAME),
            instructions: None,
            supported_versions: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            tool_timeout: Duration::from_secs(30),
        }
    }
}

/// What a transport gets back for one incoming message.
#[derive(Debug)]
pub struct Dispatch {
    /// Set when the message created a session; the transport must hand it to
    /// the client.
    pub session_id: Option<SessionId>,
    /// Messages to send back, in order.
    pub replies: Replies,
}

impl Dispatch {
    fn accepted() -> Self {
        Self {
            session_id: None,
            replies: Replies(RepliesInner::Empty),
        }
    }

    fn reply(message: OutgoingMessage) -> Self {
        Self {
            session_id: None,
            replies: Replies(RepliesInner::Single(Some(message))),
        }
    }

    fn error(id: Option<RequestId>, error: &McpError) -> Self {
        Self::reply(JsonRpcError::from_error(id, error).into())
    }

    /// Whether the client should expect a response body. False for
    /// notifications.
    #[must_use]
    pub const fn expects_reply(&self) -> bool {
        !matches!(self.replies.0, RepliesInner::Empty)
    }

    /// The error code of an immediate error reply, if this dispatch produced
    /// one without running anything.
    #[must_use]
    pub fn immediate_error_code(&self) -> Option<i32> {
        match &self.replies.0 {
            RepliesInner::Single(Some(message)) => message.error_code(),
            _ => None,
        }
    }
}

/// Lazy, finite stream of outgoing messages for one incoming message.
///
/// Progress notifications, if any, come first; the final element is the
/// response. Dropping the stream before the end tells the engine the client
/// is gone, which cancels a running tool.
#[derive(Debug)]
pub struct Replies(RepliesInner);

#[derive(Debug)]
enum RepliesInner {
    Empty,
    Single(Option<OutgoingMessage>),
    Channel(ReceiverStream<OutgoingMessage>),
}

impl Replies {
    /// Drains the stream and returns the response, skipping notifications.
    pub async fn final_response(mut self) -> Option<OutgoingMessage> {
        let mut last = None;
        while let Some(message) = self.next().await {
            if message.is_response() {
                last = Some(message);
            }
        }
        last
    }
}

impl Stream for Replies {
    type Item = OutgoingMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().0 {
            RepliesInner::Empty => Poll::Ready(None),
            RepliesInner::Single(slot) => Poll::Ready(slot.take()),
            RepliesInner::Channel(rx) => Pin::new(rx).poll_next(cx),
        }
    }
}

/// Session-aware JSON-RPC dispatcher.
#[derive(Debug)]
pub struct McpEngine {
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    settings: EngineSettings,
}

impl McpEngine {
    /// Creates an engine over a frozen registry and a session store.
    #[must_use]
    pub const fn new(
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            sessions,
            settings,
        }
    }

    /// The session store.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The tool registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Current state of a stored session.
    #[must_use]
    pub fn session_state(&self, id: &str) -> Option<SessionState> {
        self.sessions.lookup(id).ok().map(|handle| handle.state())
    }

    /// Terminates a session at the client's request.
    pub fn close_session(&self, id: &str) -> bool {
        self.sessions.close(id)
    }

    /// Handles one raw message.
    pub async fn dispatch(&self, body: &[u8], session_id: Option<&str>) -> Dispatch {
        match protocol::decode(body) {
            Ok(message) => self.dispatch_message(message, session_id).await,
            Err(err) => {
                debug!(code = err.error.code, message = %err.error.message, "Rejected message");
                Dispatch::reply(err.into())
            }
        }
    }

    /// Handles one decoded message.
    pub async fn dispatch_message(
        &self,
        message: IncomingMessage,
        session_id: Option<&str>,
    ) -> Dispatch {
        match message {
            IncomingMessage::Request(request) => self.handle_request(request, session_id).await,
            IncomingMessage::Notification(notification) => {
                self.handle_notification(notification, session_id).await;
                Dispatch::accepted()
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest, session_id: Option<&str>) -> Dispatch {
        debug!(method = %request.method, id = %request.id, "Request");
        let method = Method::from_name(&request.method);

        if method == Some(Method::Initialize) {
            return self.initialize(request, session_id);
        }

        let handle = match self.resolve(session_id) {
            Ok(handle) => handle,
            Err(e) => {
                debug!(method = %request.method, error = %e, "Request without a live session");
                return Dispatch::error(Some(request.id), &e);
            }
        };

        let Some(method) = method else {
            return Dispatch::error(
                Some(request.id),
                &McpError::MethodNotFound(request.method),
            );
        };

        let turn = handle.enter().await;
        let result = match method {
            Method::Initialize => Err(McpError::InvalidRequest("already initialized".into())),
            Method::Initialized | Method::Cancelled => Err(McpError::InvalidRequest(format!(
                "{method} is a notification and must not carry an id"
            ))),
            Method::Ping => handle.lock().ensure_open().map(|()| json!({})),
            Method::ToolsList => self.tools_list(&handle),
            Method::ToolsCall => return self.tools_call(request, handle, turn),
        };
        drop(turn);

        respond(request.id, result)
    }

    async fn handle_notification(&self, notification: JsonRpcNotification, session_id: Option<&str>) {
        debug!(method = %notification.method, "Notification");
        let Some(method) = Method::from_name(&notification.method) else {
            debug!(method = %notification.method, "Ignoring unknown notification");
            return;
        };

        let handle = match self.resolve(session_id) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(method = %method, error = %e, "Dropping notification");
                return;
            }
        };

        match method {
            Method::Initialized => {
                let _turn = handle.enter().await;
                let outcome = handle.lock().mark_initialized();
                match outcome {
                    Ok(()) => info!(session_id = %handle.id(), "Session ready"),
                    Err(e) => warn!(session_id = %handle.id(), error = %e, "Ignoring notifications/initialized"),
                }
            }
            Method::Cancelled => cancel_request(&handle, notification.params),
            Method::Initialize | Method::Ping | Method::ToolsList | Method::ToolsCall => {
                warn!(session_id = %handle.id(), method = %method, "Request sent as a notification; ignoring");
            }
        }
    }

    /// Looks up the session for a non-initialize message and refreshes it.
    fn resolve(&self, session_id: Option<&str>) -> Result<Arc<SessionHandle>, McpError> {
        let id = session_id.ok_or(McpError::SessionNotFound)?;
        let handle = self.sessions.lookup(id)?;
        handle.lock().touch();
        Ok(handle)
    }

    fn initialize(&self, request: JsonRpcRequest, session_id: Option<&str>) -> Dispatch {
        if session_id.is_some() {
            return Dispatch::error(
                Some(request.id),
                &McpError::InvalidRequest(
                    "already initialized: initialize must not carry a session id".into(),
                ),
            );
        }

        let params: InitializeParams = match parse_params(request.params) {
            Ok(params) => params,
            Err(e) => return Dispatch::error(Some(request.id), &e),
        };

        let client = params
            .client_info
            .as_ref()
            .map_or_else(|| "unknown".to_string(), |info| info.name.clone());

        let mut session = self.sessions.create();
        let version = match session.begin_initialize(params, &self.settings.supported_versions) {
            Ok(version) => version,
            Err(e) => {
                warn!(client = %client, error = %e, "Initialize rejected");
                return Dispatch::error(Some(request.id), &e);
            }
        };

        let handle = match self.sessions.assign_and_insert(session, SessionId::generate()) {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Session identifier collision");
                return Dispatch::error(Some(request.id), &e);
            }
        };

        info!(
            session_id = %handle.id(),
            client = %client,
            protocol_version = %version,
            "Session initialised"
        );

        let result = InitializeResult {
            protocol_version: version,
            capabilities: ServerCapabilities::default(),
            server_info: self.settings.server_info.clone(),
            instructions: self.settings.instructions.clone(),
        };

        let mut dispatch = respond(request.id, to_value(&result));
        dispatch.session_id = Some(handle.id().clone());
        dispatch
    }

    fn tools_list(&self, handle: &SessionHandle) -> Result<Value, McpError> {
        handle.lock().require_ready()?;
        let tools = self.registry.list();
        debug!(session_id = %handle.id(), count = tools.len(), "Listing tools");
        Ok(json!({ "tools": tools }))
    }

    /// Starts a tool call. The returned replies resolve once the worker
    /// finishes; the worker owns the session turn until then.
    fn tools_call(
        &self,
        request: JsonRpcRequest,
        handle: Arc<SessionHandle>,
        turn: OwnedMutexGuard<()>,
    ) -> Dispatch {
        let id = request.id;
        if let Err(e) = handle.lock().require_ready() {
            return Dispatch::error(Some(id), &e);
        }
        let params: ToolCallParams = match parse_params(request.params) {
            Ok(params) => params,
            Err(e) => return Dispatch::error(Some(id), &e),
        };

        let cancel = CancellationToken::new();
        {
            let mut session = handle.lock();
            let admitted = session
                .require_ready()
                .and_then(|()| session.reserve(id.clone(), cancel.clone()));
            if let Err(e) = admitted {
                drop(session);
                debug!(session_id = %handle.id(), tool = %params.name, error = %e, "Tool call refused");
                return Dispatch::error(Some(id), &e);
            }
        }

        let (tx, rx) = mpsc::channel(REPLY_BUFFER);
        let mut ctx = ToolContext::new(cancel.clone());
        if let Some(token) = params.meta.and_then(|meta| meta.progress_token) {
            ctx = ctx.with_progress(token, tx.clone());
        }

        let registry = Arc::clone(&self.registry);
        let deadline = self.settings.tool_timeout;
        let name = params.name;
        let arguments = params.arguments.unwrap_or_default();

        tokio::spawn(async move {
            debug!(session_id = %handle.id(), tool = %name, id = %id, "Tool call started");

            let outcome = run_tool(registry, name.clone(), arguments, ctx, &cancel, deadline, &tx).await;
            {
                let mut session = handle.lock();
                session.release(&id);
                session.touch();
            }
            // The next request may start while this reply is still being written.
            drop(turn);

            if let Err(e) = &outcome {
                warn!(session_id = %handle.id(), tool = %name, id = %id, error = %e, "Tool call failed");
            } else {
                debug!(session_id = %handle.id(), tool = %name, id = %id, "Tool call finished");
            }

            if tx.is_closed() {
                debug!(session_id = %handle.id(), id = %id, "Client gone; dropping tools/call response");
                return;
            }
            let reply = match outcome {
                Ok(result) => response(id, to_value(&result)),
                Err(e) => JsonRpcError::from_error(Some(id), &e).into(),
            };
            if tx.send(reply).await.is_err() {
                debug!(session_id = %handle.id(), "Client gone; dropping tools/call response");
            }
        });

        Dispatch {
            session_id: None,
            replies: Replies(RepliesInner::Channel(ReceiverStream::new(rx))),
        }
    }
}

/// Runs one handler in its own task under a deadline.
///
/// Returns early, with the handler cancelled, if the client cancels or the
/// reply channel closes. A cancelled handler gets [`CANCEL_GRACE`] to wind
/// down before it is aborted.
async fn run_tool(
    registry: Arc<ToolRegistry>,
    name: String,
    arguments: Map<String, Value>,
    ctx: ToolContext,
    cancel: &CancellationToken,
    deadline: Duration,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> Result<ToolCallResult, McpError> {
    let tool = name.clone();
    let mut task = tokio::spawn(async move { registry.invoke(&name, arguments, ctx).await });

    let outcome = tokio::select! {
        joined = tokio::time::timeout(deadline, &mut task) => match joined {
            Ok(Ok(Err(_))) if cancel.is_cancelled() => {
                return Err(McpError::tool(ToolFailure::Cancelled, "request cancelled"));
            }
            Ok(Ok(result)) => return result,
            Ok(Err(join_error)) if join_error.is_panic() => {
                error!(tool = %tool, "Tool handler panicked");
                return Err(McpError::tool(ToolFailure::Fault, "tool handler panicked"));
            }
            Ok(Err(join_error)) => {
                return Err(McpError::tool(ToolFailure::Cancelled, join_error.to_string()));
            }
            Err(_) => Err(McpError::tool(
                ToolFailure::TimedOut,
                format!("tool '{tool}' did not finish within {}s", deadline.as_secs_f64()),
            )),
        },
        () = cancel.cancelled() => Err(McpError::tool(ToolFailure::Cancelled, "request cancelled")),
        () = tx.closed() => Err(McpError::tool(ToolFailure::Cancelled, "client disconnected")),
    };

    cancel.cancel();
    if tokio::time::timeout(CANCEL_GRACE, &mut task).await.is_err() {
        debug!(tool = %tool, "Tool ignored cancellation; aborting");
        task.abort();
    }
    outcome
}

fn cancel_request(handle: &SessionHandle, params: Option<Value>) {
    let params: CancelledParams = match parse_params(params) {
        Ok(params) => params,
        Err(e) => {
            warn!(session_id = %handle.id(), error = %e, "Malformed notifications/cancelled");
            return;
        }
    };

    let found = handle.lock().cancel_request(&params.request_id);
    if found {
        info!(
            session_id = %handle.id(),
            id = %params.request_id,
            reason = params.reason.as_deref().unwrap_or(""),
            "Request cancelled by client"
        );
    } else {
        debug!(session_id = %handle.id(), id = %params.request_id, "Nothing to cancel");
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, McpError> {
    let params = params.ok_or_else(|| McpError::InvalidParams("missing params".into()))?;
    serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::Internal(e.to_string()))
}

fn response(id: RequestId, result: Result<Value, McpError>) -> OutgoingMessage {
    match result {
        Ok(value) => JsonRpcResponse::success(id, value).into(),
        Err(e) => JsonRpcError::from_error(Some(id), &e).into(),
    }
}

fn respond(id: RequestId, result: Result<Value, McpError>) -> Dispatch {
    Dispatch::reply(response(id, result))
}
