//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::{ApiConfig as ServerConfig, StreamSettings};
use crate::stream::{BackpressurePolicy, BrokerConfig as BrokerSettings};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub lookup: LookupConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Empty means any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_max_body_bytes() -> usize {
    1024 * 1024 // 1 MB
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// What the broker does when a subscriber's channel is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureMode {
    /// Queue behind the full channel, evict on overflow or timeout
    #[default]
    Buffer,
    /// Evict immediately
    Disconnect,
}

/// Broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_topic_ttl")]
    pub topic_ttl_secs: u64,

    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub backpressure: BackpressureMode,

    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,

    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

fn default_history_limit() -> usize {
    100
}

fn default_topic_ttl() -> u64 {
    120 // 2 minutes
}

fn default_reap_interval() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_backlog() -> usize {
    256
}

fn default_send_timeout() -> u64 {
    5000 // 5 seconds
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            topic_ttl_secs: default_topic_ttl(),
            reap_interval_secs: default_reap_interval(),
            channel_capacity: default_channel_capacity(),
            backpressure: BackpressureMode::default(),
            max_backlog: default_max_backlog(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

/// Transport configuration shared by SSE and WebSocket
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_close_on_terminal")]
    pub close_on_terminal: bool,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_heartbeat() -> u64 {
    20
}

fn default_close_on_terminal() -> bool {
    true
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat(),
            close_on_terminal: default_close_on_terminal(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupMode {
    /// Every well-formed key exists
    #[default]
    Open,
    /// Only registered keys exist
    Registry,
}

/// Resource lookup configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupConfig {
    #[serde(default)]
    pub mode: LookupMode,

    /// Seed keys for registry mode
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tidings").join("config.toml")),
            Some(PathBuf::from("/etc/tidings/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply `TIDINGS_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // API overrides
        if let Some(host) = var("TIDINGS_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = var("TIDINGS_API_PORT").and_then(|p| p.parse().ok()) {
            self.api.port = port;
        }

        // Broker overrides
        if let Some(limit) = var("TIDINGS_HISTORY_LIMIT").and_then(|v| v.parse().ok()) {
            self.broker.history_limit = limit;
        }
        if let Some(ttl) = var("TIDINGS_TOPIC_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.broker.topic_ttl_secs = ttl;
        }

        // Logging overrides
        if let Some(level) = var("TIDINGS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("TIDINGS_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject values that would make timers or channels unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.broker.reap_interval_secs == 0, "broker.reap_interval_secs must be > 0"),
            (self.broker.channel_capacity == 0, "broker.channel_capacity must be > 0"),
            (self.streaming.heartbeat_secs == 0, "streaming.heartbeat_secs must be > 0"),
            (self.streaming.max_frame_bytes < 125, "streaming.max_frame_bytes must be >= 125"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid(message.to_string())),
            None => Ok(()),
        }
    }

    /// Broker settings
    pub fn broker_config(&self) -> BrokerSettings {
        let backpressure = match self.broker.backpressure {
            BackpressureMode::Buffer => BackpressurePolicy::Buffer {
                max_backlog: self.broker.max_backlog,
                send_timeout: Duration::from_millis(self.broker.send_timeout_ms),
            },
            BackpressureMode::Disconnect => BackpressurePolicy::Disconnect,
        };

        BrokerSettings {
            history_limit: self.broker.history_limit,
            topic_ttl: Duration::from_secs(self.broker.topic_ttl_secs),
            reap_interval: Duration::from_secs(self.broker.reap_interval_secs),
            channel_capacity: self.broker.channel_capacity,
            backpressure,
        }
    }

    /// HTTP server settings
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.api.host.clone(),
            port: self.api.port,
            cors_origins: self.api.cors_origins.clone(),
            max_body_size: self.api.max_body_bytes,
            streaming: StreamSettings {
                heartbeat_interval: Duration::from_secs(self.streaming.heartbeat_secs),
                close_on_terminal: self.streaming.close_on_terminal,
                max_frame_size: self.streaming.max_frame_bytes,
            },
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Tidings Configuration
#
# Environment variables override these settings:
# - TIDINGS_API_HOST
# - TIDINGS_API_PORT
# - TIDINGS_HISTORY_LIMIT
# - TIDINGS_TOPIC_TTL_SECS
# - TIDINGS_LOG_LEVEL
# - TIDINGS_LOG_FORMAT

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8090

# Allowed CORS origins (empty = any)
cors_origins = []

# Maximum publish request body (bytes)
max_body_bytes = 1048576

[broker]
# Events retained per topic for replay
history_limit = 100

# Seconds a topic with no subscribers survives after its last publish
topic_ttl_secs = 120

# How often idle topics are reaped (seconds)
reap_interval_secs = 60

# Per-subscriber channel capacity
channel_capacity = 64

# Slow subscribers: "buffer" (queue, evict on overflow/timeout) or "disconnect"
backpressure = "buffer"
max_backlog = 256
send_timeout_ms = 5000

[streaming]
# SSE comment / WebSocket ping interval (seconds)
heartbeat_secs = 20

# End streams after a final or error event
close_on_terminal = true

# Largest inbound WebSocket frame payload (bytes)
max_frame_bytes = 65536

[lookup]
# "open" accepts every well-formed topic key,
# "registry" only keys registered via the API or listed below
mode = "open"
topics = []

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/tidings/tidings.log"
"#
    .to_string()
}
