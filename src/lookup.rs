//! Resource Lookup
//!
//! Both transports confirm that the resource behind a topic key exists
//! before creating a subscription. Not-found and lookup failure are kept
//! apart so handlers can answer 404 and 500 respectively.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::sync::RwLock;

/// Longest accepted topic key
pub const MAX_TOPIC_KEY_LEN: usize = 128;

/// Errors from a resource lookup
#[derive(Debug, Error)]
pub enum LookupError {
    /// No resource exists for the key
    #[error("Topic not found: {0}")]
    NotFound(String),

    /// The backing store could not answer
    #[error("Lookup unavailable: {0}")]
    Unavailable(String),
}

/// Answers whether a topic key refers to an existing resource
#[async_trait]
pub trait ResourceLookup: Send + Sync {
    async fn ensure_exists(&self, topic_key: &str) -> Result<(), LookupError>;
}

/// Treats every well-formed key as existing
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenLookup;

#[async_trait]
impl ResourceLookup for OpenLookup {
    async fn ensure_exists(&self, _topic_key: &str) -> Result<(), LookupError> {
        Ok(())
    }
}

/// In-memory set of known topic keys
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<HashSet<String>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with `keys`
    pub fn with_topics<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: RwLock::new(keys.into_iter().map(Into::into).collect()),
        }
    }

    /// Returns false if the key was already registered
    pub async fn register(&self, key: &str) -> bool {
        let inserted = self.topics.write().await.insert(key.to_string());
        if inserted {
            tracing::info!(topic = %key, "Topic registered");
        }
        inserted
    }

    /// Returns false if the key was not registered
    pub async fn unregister(&self, key: &str) -> bool {
        let removed = self.topics.write().await.remove(key);
        if removed {
            tracing::info!(topic = %key, "Topic unregistered");
        }
        removed
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.topics.read().await.contains(key)
    }

    pub async fn len(&self) -> usize {
        self.topics.read().await.len()
    }
}

#[async_trait]
impl ResourceLookup for TopicRegistry {
    async fn ensure_exists(&self, topic_key: &str) -> Result<(), LookupError> {
        if self.contains(topic_key).await {
            Ok(())
        } else {
            Err(LookupError::NotFound(topic_key.to_string()))
        }
    }
}

/// Check that a topic key is 1-128 characters of `[A-Za-z0-9._:-]`
pub fn is_valid_topic_key(key: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._:\-]+$").expect("topic key pattern is valid")
    });
    key.len() <= MAX_TOPIC_KEY_LEN && pattern.is_match(key)
}
