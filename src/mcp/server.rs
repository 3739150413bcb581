//! MCP server: wires configuration, the tool registry, the session store and
//! the HTTP transport together and runs them until shutdown.
//!
//! # Lifecycle
//!
//! 1. **Startup**: bind the listener, start the session sweeper
//! 2. **Operation**: serve the MCP endpoint
//! 3. **Shutdown**: on SIGINT/SIGTERM (Ctrl+C on Windows) stop accepting
//!    connections, let in-flight requests drain, stop the sweeper

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::mcp::engine::{EngineSettings, McpEngine};
use crate::mcp::store::SessionStore;
use crate::mcp::tools::ToolRegistry;
use crate::mcp::transport;

/// The MCP server.
#[derive(Debug)]
pub struct McpServer {
    config: Config,
    engine: Arc<McpEngine>,
}

impl McpServer {
    /// Creates a server. The registry is frozen from here on.
    #[must_use]
    pub fn new(config: Config, registry: ToolRegistry) -> Self {
        let sessions = Arc::new(SessionStore::from_config(&config.session));
        let engine = Arc::new(McpEngine::new(
            Arc::new(registry),
            sessions,
            EngineSettings::from_config(&config),
        ));
        Self { config, engine }
    }

    /// The dispatch engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<McpEngine> {
        &self.engine
    }

    /// The axum router serving the MCP endpoint.
    #[must_use]
    pub fn router(&self) -> Router {
        transport::router(
            Arc::clone(&self.engine),
            &self.config.http.path,
            self.config.http.json_response,
        )
    }

    /// Binds the configured address and serves until a shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound, signal handlers
    /// cannot be installed, or serving fails.
    pub async fn run(&self) -> io::Result<()> {
        let addr = self.config.http.socket_addr().map_err(io::Error::other)?;
        let listener = TcpListener::bind(addr).await?;

        let shutdown = CancellationToken::new();
        tokio::spawn(shutdown_signal(shutdown.clone())?);

        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> io::Result<()> {
        let sweeper = self
            .engine
            .sessions()
            .spawn_sweeper(self.config.session.sweep_interval(), shutdown.child_token());

        tracing::info!(
            addr = %listener.local_addr()?,
            path = %self.config.http.path,
            name = %self.config.name,
            tools = self.engine.registry().len(),
            "Starting MCP HTTP server"
        );

        let stop = shutdown.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await;

        shutdown.cancel();
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "Session sweeper did not stop cleanly");
        }
        tracing::info!(sessions = self.engine.sessions().len(), "Server stopped");
        result
    }
}

/// Installs signal handlers and returns a future that cancels `token` when
/// one fires.
#[cfg(unix)]
fn shutdown_signal(token: CancellationToken) -> io::Result<impl Future<Output = ()> + Send> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).map_err(io::Error::other)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(io::Error::other)?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }

            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }

            () = token.cancelled() => return,
        }
        token.cancel();
    })
}

/// Installs signal handlers and returns a future that cancels `token` when
/// one fires.
#[cfg(windows)]
#[allow(clippy::unnecessary_wraps)] // mirrors the unix signature
fn shutdown_signal(token: CancellationToken) -> io::Result<impl Future<Output = ()> + Send> {
    Ok(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }

            () = token.cancelled() => return,
        }
        token.cancel();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.http.bind = "127.0.0.1:0".to_string();
        config
    }

    #[test]
    fn engine_uses_config() {
        let mut config = config();
        config.name = "configured".to_string();
        config.instructions = Some("be nice".to_string());
        let server = McpServer::new(config, ToolRegistry::new());
        assert!(server.engine().registry().is_empty());
        assert!(server.engine().sessions().is_empty());
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let server = McpServer::new(config(), ToolRegistry::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), server.serve(listener, shutdown))
            .await
            .expect("server did not stop")
            .unwrap();
    }
}
