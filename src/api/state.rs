//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use crate::lookup::{OpenLookup, ResourceLookup, TopicRegistry};
use crate::stream::Broker;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Event broker shared by producers and both transports
    pub broker: Broker,
    /// Existence check run before every subscription
    pub lookup: Arc<dyn ResourceLookup>,
    /// Set when topics must be registered before use
    pub registry: Option<Arc<TopicRegistry>>,
    /// Transport tuning
    pub streaming: StreamSettings,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Any well-formed topic key is accepted
    pub fn new(broker: Broker, config: ApiConfig) -> Self {
        Self::with_lookup(broker, Arc::new(OpenLookup), config)
    }

    /// Only topics present in `registry` can be subscribed to
    pub fn with_registry(broker: Broker, registry: Arc<TopicRegistry>, config: ApiConfig) -> Self {
        let lookup: Arc<dyn ResourceLookup> = registry.clone();
        Self {
            registry: Some(registry),
            ..Self::with_lookup(broker, lookup, config)
        }
    }

    /// Use a custom lookup, e.g. one backed by an external store
    pub fn with_lookup(broker: Broker, lookup: Arc<dyn ResourceLookup>, config: ApiConfig) -> Self {
        Self {
            broker,
            lookup,
            registry: None,
            streaming: config.streaming.clone(),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn lookup_mode(&self) -> &'static str {
        if self.registry.is_some() {
            "registry"
        } else {
            "open"
        }
    }
}

/// Settings shared by the SSE and WebSocket adapters
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// SSE comment / WebSocket ping period
    pub heartbeat_interval: Duration,
    /// End the stream after a `final` or `error` event
    pub close_on_terminal: bool,
    /// Largest inbound WebSocket payload accepted
    pub max_frame_size: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            close_on_terminal: true,
            max_frame_size: 64 * 1024,
        }
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Allowed CORS origins; empty means permissive
    pub cors_origins: Vec<String>,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    pub streaming: StreamSettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            cors_origins: Vec::new(),
            max_body_size: 1024 * 1024, // 1MB
            streaming: StreamSettings::default(),
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
