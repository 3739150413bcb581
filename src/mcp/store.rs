//! Concurrent session table.
//!
//! Sessions live in a sharded [`DashMap`] so lookups for different clients do
//! not contend. Lock order is always shard, then session state: no code path
//! holds a session's state lock while touching the map.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::McpError;
use crate::mcp::session::{Session, SessionHandle, SessionId, SessionState};

/// Outcome of one [`SessionStore::sweep`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions that went idle and were closed during this pass.
    pub expired: usize,
    /// Closed sessions removed from the store.
    pub evicted: usize,
}

/// Mapping from session identifier to live session.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    idle_timeout: Duration,
    retention: Duration,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(idle_timeout: Duration, retention: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
            retention,
        }
    }

    /// Creates an empty store with timings from configuration.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.idle_timeout(), config.retention())
    }

    /// A fresh session in state `New`. Not yet stored.
    #[must_use]
    pub fn create(&self) -> Session {
        Session::new()
    }

    /// Assigns `id` to `session` and stores it.
    ///
    /// # Errors
    ///
    /// [`McpError::DuplicateSessionId`] if `id` is already present.
    pub fn assign_and_insert(
        &self,
        mut session: Session,
        id: SessionId,
    ) -> Result<Arc<SessionHandle>, McpError> {
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(McpError::DuplicateSessionId),
            Entry::Vacant(slot) => {
                session.assign_id(id.clone());
                let handle = Arc::new(SessionHandle::new(id, session));
                slot.insert(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }

    /// Finds a live session.
    ///
    /// A session found idle past the timeout is closed on the spot. One with
    /// a `tools/call` still running is never idle.
    ///
    /// # Errors
    ///
    /// - [`McpError::SessionNotFound`] if the id is unknown or evicted
    /// - [`McpError::SessionClosed`] if the session is closed
    pub fn lookup(&self, id: &str) -> Result<Arc<SessionHandle>, McpError> {
        let handle = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(McpError::SessionNotFound)?;

        let mut session = handle.lock();
        match session.state() {
            SessionState::Closed => return Err(McpError::SessionClosed),
            _ if is_idle(&session, self.idle_timeout) => {
                session.close();
                info!(session_id = %id, "Session expired");
                return Err(McpError::SessionClosed);
            }
            _ => {}
        }
        drop(session);
        Ok(handle)
    }

    /// Refreshes a session's last-activity time.
    ///
    /// # Errors
    ///
    /// Same as [`SessionStore::lookup`].
    pub fn touch(&self, id: &str) -> Result<(), McpError> {
        self.lookup(id)?.lock().touch();
        Ok(())
    }

    /// Closes and evicts a session. Returns whether one was present.
    pub fn close(&self, id: &str) -> bool {
        let Some((_, handle)) = self.sessions.remove(id) else {
            return false;
        };
        let mut session = handle.lock();
        session.close();
        info!(
            session_id = %id,
            completed_calls = session.completed_calls(),
            "Session terminated"
        );
        true
    }

    /// Closes idle sessions and evicts those closed longer than the
    /// retention window.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        self.sessions.retain(|id, handle| {
            let mut session = handle.lock();
            if session.state() != SessionState::Closed && is_idle(&session, self.idle_timeout) {
                session.close();
                report.expired += 1;
                debug!(
                    session_id = %id,
                    completed_calls = session.completed_calls(),
                    "Session expired"
                );
            }
            let evict = session
                .closed_for()
                .is_some_and(|closed| closed >= self.retention);
            if evict {
                report.evicted += 1;
            }
            !evict
        });
        report
    }

    /// Runs [`SessionStore::sweep`] every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = store.sweep();
                        if report != SweepReport::default() {
                            info!(
                                expired = report.expired,
                                evicted = report.evicted,
                                live = store.len(),
                                "Session sweep"
                            );
                        }
                    }
                }
            }
            debug!("Session sweeper stopped");
        })
    }

    /// Number of stored sessions, closed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn is_idle(session: &Session, idle_timeout: Duration) -> bool {
    session.in_flight() == 0 && session.idle_for() >= idle_timeout
}
