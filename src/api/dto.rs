//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::{BrokerStats, EventKind};

// ============================================
// STREAM DTOs
// ============================================

/// Query string accepted by both streaming endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ResumeQuery {
    /// Resume after this event id
    #[serde(default)]
    pub last_event_id: Option<String>,
}

impl ResumeQuery {
    /// The query value, ignoring an empty string
    pub fn resume_point(&self) -> Option<String> {
        self.last_event_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

// ============================================
// PUBLISH DTOs
// ============================================

/// Publish request: the payload half of an event
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: Value,
}

// ============================================
// TOPIC DTOs
// ============================================

/// Topic registration response
#[derive(Debug, Serialize, Deserialize)]
pub struct TopicResponse {
    pub topic: String,
    /// False when the topic was already registered
    pub created: bool,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "stopping"
    pub status: String,
    /// "open" or "registry"
    pub lookup: String,
    pub broker: BrokerStats,
    pub uptime_seconds: u64,
    pub version: String,
}
