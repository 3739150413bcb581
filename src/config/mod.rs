//! Configuration file loading and parsing.
//!
//! This module handles loading the configuration file from disk, applying
//! environment overrides and validating the result.
//!
//! # Configuration Sources
//!
//! Settings are resolved in the following order:
//!
//! 1. Path given on the command line (must exist)
//! 2. Default location, used only when present:
//!    - **Linux/macOS:** `~/.mcp-simple-server/config.json`
//!    - **Windows:** `%USERPROFILE%\.mcp-simple-server\config.json`
//! 3. Built-in defaults
//!
//! `MCP_SERVER_NAME` and `LOG_LEVEL` then override the corresponding fields.

mod settings;

pub use settings::{
    Config, HttpConfig, LoggingConfig, ProtocolConfig, SessionConfig, ToolsConfig,
    DEFAULT_SERVER_NAME, ENV_LOG_LEVEL, ENV_SERVER_NAME,
};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.mcp-simple-server/`
/// - **Windows:** `%USERPROFILE%\.mcp-simple-server\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".mcp-simple-server"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Loads configuration using the process environment for overrides.
///
/// # Errors
///
/// See [`load_config_with`].
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Loads configuration, resolving overrides through `lookup`.
///
/// If `path` is `None`, the default location is used when a file exists
/// there; otherwise built-in defaults apply.
///
/// # Errors
///
/// Returns an error if:
/// - An explicitly given configuration file cannot be found
/// - The file cannot be read
/// - The JSON is malformed
/// - Any field fails validation after overrides are applied
pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound {
                    path: p.to_path_buf(),
                });
            }
            Some(p.to_path_buf())
        }
        None => default_config_path().filter(|p| p.exists()),
    };

    let mut config = match config_path {
        Some(config_path) => read_config_file(&config_path)?,
        None => Config::default(),
    };

    config.apply_env_overrides(lookup);

    // Validate the configuration
    config.validate()?;

    Ok(config)
}

fn read_config_file(config_path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.to_path_buf(),
        source: e,
    })?;

    serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: config_path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_dir_exists() {
        assert!(default_config_dir().is_some());
    }

    #[test]
    fn default_config_path_exists() {
        let path = default_config_path();
        assert!(path.is_some());
        assert!(path.unwrap().to_string_lossy().contains("config.json"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = load_config_with(Some(&missing), |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn loads_file_and_applies_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "name": "from-file", "logging": { "level": "warn" } }"#)
            .unwrap();

        let config = load_config_with(Some(&path), |key| {
            (key == ENV_LOG_LEVEL).then(|| "trace".to_string())
        })
        .unwrap();

        assert_eq!(config.name, "from-file");
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_config_with(Some(&path), |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_values_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let err = load_config_with(Some(&path), |key| {
            (key == ENV_LOG_LEVEL).then(|| "loud".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }
}
