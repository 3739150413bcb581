//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.
//! Every section is optional; a missing file yields [`Config::default`].

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::protocol::SUPPORTED_PROTOCOL_VERSIONS;

/// Default server name announced in `serverInfo`.
pub const DEFAULT_SERVER_NAME: &str = "mcp-simple-server";

/// Environment variable overriding [`Config::name`].
pub const ENV_SERVER_NAME: &str = "MCP_SERVER_NAME";

/// Environment variable overriding [`LoggingConfig::level`].
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server name reported during initialisation.
    #[serde(default = "default_name")]
    pub name: String,

    /// Optional usage instructions returned from `initialize`.
    #[serde(default)]
    pub instructions: Option<String>,

    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Session lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Tool invocation settings.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Protocol negotiation settings.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            _schema: None,
            _comment: None,
            name: default_name(),
            instructions: None,
            http: HttpConfig::default(),
            session: SessionConfig::default(),
            tools: ToolsConfig::default(),
            protocol: ProtocolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Applies environment overrides.
    ///
    /// `lookup` is normally `std::env::var(..).ok()`; tests pass a closure.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_SERVER_NAME).filter(|v| !v.trim().is_empty()) {
            self.name = name;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.logging.level = level.to_lowercase();
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(invalid("Server name must not be empty"));
        }

        self.http.socket_addr()?;

        if !self.http.path.starts_with('/') {
            return Err(invalid(format!(
                "HTTP path '{}' must start with '/'",
                self.http.path
            )));
        }

        if self.session.idle_timeout_secs == 0 {
            return Err(invalid("session.idle_timeout_secs must be greater than 0"));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(invalid("session.sweep_interval_secs must be greater than 0"));
        }
        if self.tools.call_timeout_secs == 0 {
            return Err(invalid("tools.call_timeout_secs must be greater than 0"));
        }

        if self.protocol.supported_versions.is_empty() {
            return Err(invalid(
                "protocol.supported_versions must list at least one version",
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        message: message.into(),
    }
}

fn default_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Socket address to listen on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Endpoint path for the MCP endpoint.
    #[serde(default = "default_path")]
    pub path: String,

    /// Always answer requests with a single JSON document, even when the
    /// client accepts `text/event-stream`.
    #[serde(default)]
    pub json_response: bool,
}

impl HttpConfig {
    /// Parses [`HttpConfig::bind`] into a socket address.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the address is malformed.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| invalid(format!("Invalid bind address '{}'", self.bind)))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path: default_path(),
            json_response: false,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_path() -> String {
    "/mcp".to_string()
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Idle time after which a session is closed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How long a closed session is retained before eviction.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Interval of the background sweeper.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Retention window as a [`Duration`].
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            retention_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

const fn default_idle_timeout() -> u64 {
    30 * 60
}

const fn default_retention() -> u64 {
    5 * 60
}

const fn default_sweep_interval() -> u64 {
    60
}

/// Tool invocation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    /// Deadline for a single `tools/call`.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

impl ToolsConfig {
    /// Call deadline as a [`Duration`].
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
        }
    }
}

const fn default_call_timeout() -> u64 {
    30
}

/// Protocol negotiation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Protocol versions accepted in `initialize`.
    #[serde(default = "default_supported_versions")]
    pub supported_versions: Vec<String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            supported_versions: default_supported_versions(),
        }
    }
}

fn default_supported_versions() -> Vec<String> {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
