//! # Tidings
//!
//! Real-time event distribution: an in-process publish/subscribe broker with
//! bounded, replayable per-topic history, served to clients over
//! Server-Sent Events and a hand-written WebSocket transport.
//!
//! ## Features
//!
//! - **Resumable delivery**: clients reconnect with the last event id they
//!   saw and receive exactly the events after it, then live events
//! - **Bounded memory**: per-topic history limit and idle-topic reaping
//! - **Slow consumers never stall producers**: publish is non-blocking;
//!   lagging subscribers are buffered up to a limit, then evicted
//! - **Two transports, one envelope**: `{"id", "type", "data"}`
//!
//! ## Modules
//!
//! - [`stream`]: broker, subscriptions and the event model
//! - [`sse`]: Server-Sent Events adapter
//! - [`websocket`]: RFC 6455 handshake, frame codec and connection loop
//! - [`lookup`]: topic existence checks
//! - [`api`]: HTTP router and server with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tidings::stream::{Broker, BrokerConfig, Payload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::new(BrokerConfig::default());
//!
//!     let mut sub = broker.subscribe("assessment-42", None);
//!
//!     broker.publish("assessment-42", Payload::status("generating"))?;
//!     broker.publish("assessment-42", Payload::token("The"))?;
//!     broker.publish("assessment-42", Payload::final_report("report-7"))?;
//!
//!     while let Some(event) = sub.recv().await {
//!         println!("{} {} {}", event.id, event.kind, event.data);
//!         if event.kind.is_terminal() {
//!             break;
//!         }
//!     }
//!
//!     broker.stop();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod lookup;
pub mod sse;
pub mod stream;
pub mod websocket;

// Re-export top-level types for convenience
pub use stream::{
    BackpressurePolicy, Broker, BrokerConfig, BrokerError, BrokerResult, BrokerStats, Event,
    EventKind, Payload, Subscription,
};

pub use lookup::{LookupError, OpenLookup, ResourceLookup, TopicRegistry};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState, StreamSettings};

pub use config::{Config, ConfigError, LoggingConfig};
