//! Per-client session lifecycle.
//!
//! ```text
//!   New ──initialize──▶ Initializing ──notifications/initialized──▶ Ready
//!    │                       │                                       │
//!    └───────────────────────┴──────────── expiry ─────────────────▶ Closed
//! ```
//!
//! A [`Session`] is plain data plus transition methods. The store wraps each
//! identified session in a [`SessionHandle`], which adds the two locks the
//! engine needs: a short synchronous lock around the state, and an async FIFO
//! lock that orders requests on the same session.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::McpError;
use crate::mcp::protocol::RequestId;
use crate::mcp::types::{ClientInfo, InitializeParams};

/// Opaque, unguessable session identifier.
///
/// 122 random bits from the OS CSPRNG, rendered as 32 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The identifier as sent in the `Mcp-Session-Id` header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created for an `initialize` request, no identifier yet.
    New,
    /// `initialize` answered, waiting for `notifications/initialized`.
    Initializing,
    /// Fully operational.
    Ready,
    /// Terminal.
    Closed,
}

/// State of one client session.
#[derive(Debug)]
pub struct Session {
    id: Option<SessionId>,
    state: SessionState,
    protocol_version: Option<String>,
    client_capabilities: Value,
    client_info: Option<ClientInfo>,
    created_at: DateTime<Utc>,
    last_activity: Instant,
    closed_at: Option<Instant>,
    in_flight: HashMap<RequestId, CancellationToken>,
    completed_calls: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A session in state [`SessionState::New`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: None,
            state: SessionState::New,
            protocol_version: None,
            client_capabilities: Value::Null,
            client_info: None,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            closed_at: None,
            in_flight: HashMap::new(),
            completed_calls: 0,
        }
    }

    /// Identifier, once assigned.
    #[must_use]
    pub const fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Protocol version agreed during `initialize`.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Capabilities the client declared.
    #[must_use]
    pub const fn client_capabilities(&self) -> &Value {
        &self.client_capabilities
    }

    /// Client implementation info, if sent.
    #[must_use]
    pub const fn client_info(&self) -> Option<&ClientInfo> {
        self.client_info.as_ref()
    }

    /// Wall-clock creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of `tools/call` requests currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of `tools/call` requests that have finished.
    #[must_use]
    pub const fn completed_calls(&self) -> u64 {
        self.completed_calls
    }

    /// `New -> Initializing`.
    ///
    /// Returns the negotiated protocol version.
    ///
    /// # Errors
    ///
    /// - [`McpError::InvalidRequest`] if the session is past `New`
    /// - [`McpError::InvalidParams`] if the requested version is unsupported;
    ///   the session stays `New`
    pub fn begin_initialize(
        &mut self,
        params: InitializeParams,
        supported_versions: &[String],
    ) -> Result<String, McpError> {
        if self.state != SessionState::New {
            return Err(McpError::InvalidRequest("already initialized".into()));
        }

        if !supported_versions.contains(&params.protocol_version) {
            return Err(McpError::InvalidParams(format!(
                "Unsupported protocol version '{}'. Supported: {}",
                params.protocol_version,
                supported_versions.join(", ")
            )));
        }

        self.protocol_version = Some(params.protocol_version.clone());
        self.client_capabilities = params.capabilities;
        self.client_info = params.client_info;
        self.state = SessionState::Initializing;
        Ok(params.protocol_version)
    }

    /// Records the identifier. Called once by the store on insertion.
    pub(crate) fn assign_id(&mut self, id: SessionId) {
        debug_assert!(self.id.is_none(), "session identifier assigned twice");
        self.id = Some(id);
    }

    /// `Initializing -> Ready`.
    ///
    /// # Errors
    ///
    /// [`McpError::SessionClosed`] once closed, [`McpError::InvalidRequest`]
    /// from any other state.
    pub fn mark_initialized(&mut self) -> Result<(), McpError> {
        match self.state {
            SessionState::Initializing => {
                self.state = SessionState::Ready;
                Ok(())
            }
            SessionState::Closed => Err(McpError::SessionClosed),
            SessionState::New => Err(McpError::InvalidRequest("initialize not completed".into())),
            SessionState::Ready => Err(McpError::InvalidRequest("session already ready".into())),
        }
    }

    /// Gate for `tools/*`.
    ///
    /// # Errors
    ///
    /// [`McpError::SessionClosed`] once closed, [`McpError::InvalidRequest`]
    /// before the handshake completed.
    pub fn require_ready(&self) -> Result<(), McpError> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(McpError::SessionClosed),
            SessionState::New | SessionState::Initializing => {
                Err(McpError::InvalidRequest("session not yet ready".into()))
            }
        }
    }

    /// Gate for methods allowed in any live state.
    ///
    /// # Errors
    ///
    /// [`McpError::SessionClosed`] once closed.
    pub fn ensure_open(&self) -> Result<(), McpError> {
        if self.state == SessionState::Closed {
            return Err(McpError::SessionClosed);
        }
        Ok(())
    }

    /// Refreshes the last-activity time.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// How long since the last accepted message.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// How long the session has been closed, if it is.
    #[must_use]
    pub fn closed_for(&self) -> Option<Duration> {
        self.closed_at.map(|at| at.elapsed())
    }

    /// Moves to `Closed` and cancels every running call. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.closed_at = Some(Instant::now());
        for (_, token) in self.in_flight.drain() {
            token.cancel();
        }
    }

    /// Reserves the in-flight slot for a request.
    ///
    /// # Errors
    ///
    /// [`McpError::InvalidRequest`] if a request with the same id is still
    /// running on this session.
    pub fn reserve(&mut self, id: RequestId, cancel: CancellationToken) -> Result<(), McpError> {
        if self.in_flight.contains_key(&id) {
            return Err(McpError::InvalidRequest(format!(
                "request id {id} is already in flight"
            )));
        }
        self.in_flight.insert(id, cancel);
        Ok(())
    }

    /// Frees the in-flight slot and records completion.
    pub fn release(&mut self, id: &RequestId) {
        if self.in_flight.remove(id).is_some() {
            self.completed_calls += 1;
        }
    }

    /// Cancels a running request. Returns whether one was found.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        self.in_flight.get(id).is_some_and(|token| {
            token.cancel();
            true
        })
    }
}

/// Shared handle to an identified session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    state: Mutex<Session>,
    turn: Arc<tokio::sync::Mutex<()>>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, session: Session) -> Self {
        Self {
            id,
            state: Mutex::new(session),
            turn: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The session identifier.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Locks the session state. Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.state.lock()
    }

    /// Snapshot of the lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.lock().state()
    }

    /// Waits for this session's turn. Waiters are served in arrival order;
    /// the turn passes on when the returned guard is dropped.
    pub async fn enter(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.turn).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn supported() -> Vec<String> {
        vec!["2025-03-26".to_string(), "2024-11-05".to_string()]
    }

    fn params(version: &str) -> InitializeParams {
        serde_json::from_value(json!({
            "protocolVersion": version,
            "capabilities": { "sampling": {} },
            "clientInfo": { "name": "test-client", "version": "1.0.0" }
        }))
        .unwrap()
    }

    #[test]
    fn identifiers_are_unique_and_hex() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn happy_path_transitions() {
        let mut session = Session::new();
        assert_eq!(session.state(), SessionState::New);

        let version = session
            .begin_initialize(params("2025-03-26"), &supported())
            .unwrap();
        assert_eq!(version, "2025-03-26");
        assert_eq!(session.state(), SessionState::Initializing);
        assert_eq!(session.client_info().unwrap().name, "test-client");
        assert!(session.client_capabilities().get("sampling").is_some());

        assert!(session.require_ready().is_err());
        session.mark_initialized().unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.require_ready().is_ok());
    }

    #[test]
    fn unsupported_version_keeps_session_new() {
        let mut session = Session::new();
        let err = session
            .begin_initialize(params("1999-01-01"), &supported())
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidParams(_)));
        assert_eq!(session.state(), SessionState::New);
        assert!(session.protocol_version().is_none());
    }

    #[test]
    fn reinitialize_is_rejected() {
        let mut session = Session::new();
        session
            .begin_initialize(params("2025-03-26"), &supported())
            .unwrap();
        let err = session
            .begin_initialize(params("2025-03-26"), &supported())
            .unwrap_err();
        assert_eq!(err, McpError::InvalidRequest("already initialized".into()));
    }

    #[test]
    fn initialized_out_of_order_is_rejected() {
        let mut session = Session::new();
        assert!(session.mark_initialized().is_err());
        assert_eq!(session.state(), SessionState::New);
    }

    #[test]
    fn closed_rejects_everything() {
        let mut session = Session::new();
        session
            .begin_initialize(params("2025-03-26"), &supported())
            .unwrap();
        session.close();

        assert_eq!(session.require_ready(), Err(McpError::SessionClosed));
        assert_eq!(session.ensure_open(), Err(McpError::SessionClosed));
        assert_eq!(session.mark_initialized(), Err(McpError::SessionClosed));
        assert!(session.closed_for().is_some());
    }

    #[test]
    fn in_flight_slots() {
        let mut session = Session::new();
        let token = CancellationToken::new();
        session
            .reserve(RequestId::Number(1), token.clone())
            .unwrap();
        assert!(session
            .reserve(RequestId::Number(1), CancellationToken::new())
            .is_err());
        assert_eq!(session.in_flight(), 1);

        assert!(session.cancel_request(&RequestId::Number(1)));
        assert!(token.is_cancelled());
        assert!(!session.cancel_request(&RequestId::Number(2)));

        session.release(&RequestId::Number(1));
        assert_eq!(session.in_flight(), 0);
        assert_eq!(session.completed_calls(), 1);
    }

    #[test]
    fn close_cancels_running_calls() {
        let mut session = Session::new();
        let token = CancellationToken::new();
        session.reserve(RequestId::Number(5), token.clone()).unwrap();
        session.close();
        assert!(token.is_cancelled());
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_tracks_touch() {
        let mut session = Session::new();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(session.idle_for() >= Duration::from_secs(10));
        session.touch();
        assert!(session.idle_for() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn turns_are_exclusive() {
        let handle = SessionHandle::new(SessionId::generate(), Session::new());
        let first = handle.enter().await;
        assert!(handle.turn.try_lock().is_err());
        drop(first);
        assert!(handle.turn.try_lock().is_ok());
    }
}
