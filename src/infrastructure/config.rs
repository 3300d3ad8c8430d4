//! Configuration management for the stream manager
//!
//! Loads configuration from config.toml at startup.
//! All values are configurable to avoid hardcoded constants.

use crate::exchanges::okex::{KlineInterval, OKEX_STREAM_URL};
use crate::ws::router::{Policy, RouterConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Stream manager configuration
///
/// Loaded from config.toml at startup. Every section falls back to its
/// defaults when missing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Connection lifecycle settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Channels the bundled runner subscribes to
    #[serde(default)]
    pub feed: FeedConfig,
}

/// Connection lifecycle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// WebSocket endpoint
    #[serde(default = "default_url")]
    pub url: String,

    /// Heartbeat sweep period in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Global reconnect policy
    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Chatty per-subscription logging
    #[serde(default)]
    pub verbose: bool,

    /// First backoff step after a connection failed before opening
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Backoff cap
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files, console only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Write file logs as JSON lines
    #[serde(default)]
    pub json: bool,
}

/// Channels for the bundled runner
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Spot symbols, e.g. "btc_usdt". Several symbols share one connection.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Kline interval
    #[serde(default = "default_interval")]
    pub interval: KlineInterval,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect: true,
            verbose: false,
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            json: false,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            interval: default_interval(),
        }
    }
}

fn default_url() -> String {
    OKEX_STREAM_URL.to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    1_000
}

fn default_max_reconnect_delay() -> u64 {
    60_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_symbols() -> Vec<String> {
    vec!["btc_usdt".to_string()]
}

fn default_interval() -> KlineInterval {
    KlineInterval::OneMinute
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Router settings derived from this section
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            heartbeat_interval: self.heartbeat_interval(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            policy: Policy {
                reconnect: self.reconnect,
                verbose: self.verbose,
            },
        }
    }
}

impl Config {
    /// Load configuration from config.toml file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be parsed or fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::IoError(e)),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.stream.url)
            .map_err(|e| ConfigError::Invalid(format!("stream.url: {}", e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "stream.url: expected ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if self.stream.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "stream.heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        if self.stream.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "stream.connect_timeout_secs must be positive".to_string(),
            ));
        }
        if self.stream.reconnect_delay_ms > self.stream.max_reconnect_delay_ms {
            return Err(ConfigError::Invalid(
                "stream.reconnect_delay_ms exceeds stream.max_reconnect_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading file
    IoError(std::io::Error),
    /// Parse error (invalid TOML)
    ParseError(String),
    /// Value out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::ParseError(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(e) => write!(f, "Invalid config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(_) | ConfigError::Invalid(_) => None,
        }
    }
}
