//! Event Streaming Core
//!
//! The broker and the event model shared by every transport.
//!
//! ## Architecture
//!
//! - **Broker**: topic map with bounded, replayable history per topic
//! - **Subscription**: one subscriber's view of a topic (replay, then live)
//! - **Event**: the `{id, type, data}` envelope both transports emit
//!
//! ## Example
//!
//! ```rust,no_run
//! use tidings::stream::{Broker, BrokerConfig, Payload};
//!
//! # async fn demo() -> Result<(), tidings::stream::BrokerError> {
//! let broker = Broker::new(BrokerConfig::default());
//!
//! broker.publish("assessment-42", Payload::status("generating"))?;
//!
//! // Resume after event 1: only later events are replayed
//! let mut sub = broker.subscribe("assessment-42", Some("1"));
//! broker.publish("assessment-42", Payload::token("Hello"))?;
//! while let Some(event) = sub.recv().await {
//!     println!("{} {}", event.id, event.kind);
//! }
//! # Ok(())
//! # }
//! ```

mod broker;
mod error;
mod event;

pub use broker::{BackpressurePolicy, Broker, BrokerConfig, BrokerStats, Subscription};
pub use error::{BrokerError, BrokerResult};
pub use event::{Event, EventKind, Payload, UnknownEventKind};
