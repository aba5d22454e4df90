use crate::mcp::protocol::LogLevel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Runtime settings for the MCP server core
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Per-session notification budget per minute
    pub rate_limit_per_minute: u32,
    /// Notification coalescing window in milliseconds
    pub default_debounce_ms: u64,
    /// Manager backlog bound per session
    pub max_queued_notifications: usize,
    /// Redact `error.data` from JSON-RPC error responses
    pub mask_error_details: bool,
    /// Server-wide log level floor for `notifications/message`
    pub min_log_level: String,
    /// SSE retention ring size per stream
    pub event_store_capacity: usize,
    /// Timeout for server-initiated requests in milliseconds
    pub request_timeout_ms: u64,
    /// HTTP bind host
    pub http_host: String,
    /// HTTP bind port
    pub http_port: u16,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid rate limit: {0} (must be at least 1)")]
    InvalidRateLimit(u32),
    #[error("Invalid debounce window: {0}ms (must be at most 60000)")]
    InvalidDebounce(u64),
    #[error("Invalid queue bound: {0} (must be at least 1)")]
    InvalidQueueBound(usize),
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid event store capacity: {0} (must be at least 1)")]
    InvalidEventCapacity(usize),
    #[error("Invalid request timeout: {0}ms (must be at least 1)")]
    InvalidRequestTimeout(u64),
    #[error("Invalid host: cannot be empty")]
    InvalidHost,
    #[error("Invalid port: {0} (must be nonzero)")]
    InvalidPort(u16),
    #[error("Invalid value for {key}: {value}")]
    InvalidEnvValue { key: String, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for ServerSettings {
    #[inline]
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
            default_debounce_ms: 100,
            max_queued_notifications: 1000,
            mask_error_details: false,
            min_log_level: "info".to_string(),
            event_store_capacity: 1024,
            request_timeout_ms: 60_000,
            http_host: "127.0.0.1".to_string(),
            http_port: 8786,
        }
    }
}

impl ServerSettings {
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".toolhost-mcp"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load settings: defaults, then the optional config file, then `MCP_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path =
            Self::config_file_path().context("Failed to determine config file path")?;

        let mut settings = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };

        settings
            .overlay_env_from(|key| std::env::var(key).ok())
            .context("Failed to apply environment overrides")?;

        settings
            .validate()
            .context("Configuration validation failed")?;

        Ok(settings)
    }

    /// Persist the settings to the config file
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = Self::config_dir().context("Failed to determine config directory")?;
        fs::create_dir_all(&config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = config_dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Overlay settings from an environment-shaped lookup.
    ///
    /// Separated from `std::env` so the overlay is testable without
    /// mutating process state.
    pub fn overlay_env_from<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
            value.parse().map_err(|_| ConfigError::InvalidEnvValue {
                key: key.to_string(),
                value,
            })
        }

        if let Some(v) = get("MCP_RATE_LIMIT_PER_MINUTE") {
            self.rate_limit_per_minute = parsed("MCP_RATE_LIMIT_PER_MINUTE", v)?;
        }
        if let Some(v) = get("MCP_DEFAULT_DEBOUNCE_MS") {
            self.default_debounce_ms = parsed("MCP_DEFAULT_DEBOUNCE_MS", v)?;
        }
        if let Some(v) = get("MCP_MAX_QUEUED_NOTIFICATIONS") {
            self.max_queued_notifications = parsed("MCP_MAX_QUEUED_NOTIFICATIONS", v)?;
        }
        if let Some(v) = get("MCP_MASK_ERROR_DETAILS") {
            self.mask_error_details = parsed("MCP_MASK_ERROR_DETAILS", v)?;
        }
        if let Some(v) = get("MCP_MIN_LOG_LEVEL") {
            self.min_log_level = v;
        }
        if let Some(v) = get("MCP_EVENT_STORE_CAPACITY") {
            self.event_store_capacity = parsed("MCP_EVENT_STORE_CAPACITY", v)?;
        }
        if let Some(v) = get("MCP_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parsed("MCP_REQUEST_TIMEOUT_MS", v)?;
        }
        if let Some(v) = get("MCP_HTTP_HOST") {
            self.http_host = v;
        }
        if let Some(v) = get("MCP_HTTP_PORT") {
            self.http_port = parsed("MCP_HTTP_PORT", v)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimit(self.rate_limit_per_minute));
        }
        if self.default_debounce_ms > 60_000 {
            return Err(ConfigError::InvalidDebounce(self.default_debounce_ms));
        }
        if self.max_queued_notifications == 0 {
            return Err(ConfigError::InvalidQueueBound(self.max_queued_notifications));
        }
        if LogLevel::from_str(&self.min_log_level).is_err() {
            return Err(ConfigError::InvalidLogLevel(self.min_log_level.clone()));
        }
        if self.event_store_capacity == 0 {
            return Err(ConfigError::InvalidEventCapacity(self.event_store_capacity));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidRequestTimeout(self.request_timeout_ms));
        }
        if self.http_host.trim().is_empty() {
            return Err(ConfigError::InvalidHost);
        }
        if self.http_port == 0 {
            return Err(ConfigError::InvalidPort(self.http_port));
        }
        Ok(())
    }

    /// The validated log level floor
    #[inline]
    pub fn log_level_floor(&self) -> LogLevel {
        LogLevel::from_str(&self.min_log_level).unwrap_or(LogLevel::Info)
    }

    /// Bind target for the HTTP transports
    #[inline]
    pub fn bind_addr(&self) -> (String, u16) {
        (self.http_host.clone(), self.http_port)
    }
}
