//! Configuration management for the remote REPL server.
//!
//! TOML-based configuration, loaded from `~/.config/remote-repl/config.toml`
//! by default. Missing files and missing keys fall back to defaults.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("bind must be a socket address such as 127.0.0.1:44445, got {0}")]
    InvalidBind(String),

    #[error("path must start with '/', got {0}")]
    InvalidPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("interpreter command must not be empty")]
    EmptyInterpreter,
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener configuration.
    pub server: ServerConfig,

    /// Client authentication.
    pub auth: AuthConfig,

    /// Interpreter process configuration.
    pub interpreter: InterpreterConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: String,

    /// HTTP path of the WebSocket endpoint.
    pub path: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Client authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret. Absent or empty disables login.
    pub password: Option<String>,
}

/// Interpreter process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Python executable, optionally with leading arguments.
    pub command: String,

    /// Extra arguments passed to the interpreter.
    pub args: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:44445".to_string(),
            path: "/ws".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            command: if cfg!(windows) { "python" } else { "python3" }.to_string(),
            args: Vec::new(),
        }
    }
}

/// Returns the default configuration file path.
#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remote-repl")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - `REMOTE_REPL_BIND`: Override listen address
    /// - `REMOTE_REPL_PASSWORD`: Override shared secret
    /// - `REMOTE_REPL_LOG_LEVEL`: Override log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("REMOTE_REPL_BIND") {
            if !bind.is_empty() {
                tracing::info!("Overriding bind from environment: {}", bind);
                self.server.bind = bind;
            }
        }

        if let Ok(password) = std::env::var("REMOTE_REPL_PASSWORD") {
            if !password.is_empty() {
                tracing::info!("Overriding password from environment");
                self.auth.password = Some(password);
            }
        }

        if let Ok(level) = std::env::var("REMOTE_REPL_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// # Errors
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.server.path.clone()));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        if self.interpreter.command.trim().is_empty() {
            return Err(ConfigError::EmptyInterpreter);
        }

        Ok(())
    }

    /// Parsed listen address.
    ///
    /// # Errors
    /// Returns error if `bind` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.server.bind.clone()))
    }

    /// Whether clients must log in.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        self.auth.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid TOML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be loaded.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns error if the string is not valid configuration TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
