//! Event Model
//!
//! Wire-agnostic notifications carried by the broker. Both transports
//! render the same `{id, type, data}` envelope.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The closed set of notification kinds a producer may emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Pipeline phase change (e.g. "generating", "scoring")
    Status,
    /// A streamed fragment of generated text
    Token,
    /// Running token count
    Progress,
    /// The result is ready; nothing further will be published
    Final,
    /// The pipeline failed; nothing further will be published
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Token => "token",
            EventKind::Progress => "progress",
            EventKind::Final => "final",
            EventKind::Error => "error",
        }
    }

    /// Whether this kind ends a topic's stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Final | EventKind::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(EventKind::Status),
            "token" => Ok(EventKind::Token),
            "progress" => Ok(EventKind::Progress),
            "final" => Ok(EventKind::Final),
            "error" => Ok(EventKind::Error),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

/// What a producer hands to `Broker::publish`
///
/// `data` is serialized at publish time, so any `Serialize` body works.
#[derive(Debug, Clone)]
pub struct Payload<T = Value> {
    pub kind: EventKind,
    pub data: T,
}

impl<T: Serialize> Payload<T> {
    pub fn new(kind: EventKind, data: T) -> Self {
        Self { kind, data }
    }
}

impl Payload<Value> {
    pub fn status(phase: &str) -> Self {
        Self::new(EventKind::Status, json!({ "phase": phase }))
    }

    pub fn token(text: &str) -> Self {
        Self::new(EventKind::Token, json!({ "text": text }))
    }

    pub fn progress(tokens: u64) -> Self {
        Self::new(EventKind::Progress, json!({ "tokens": tokens }))
    }

    pub fn final_report(report_id: &str) -> Self {
        Self::new(EventKind::Final, json!({ "report_id": report_id }))
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self::new(EventKind::Error, json!({ "code": code, "message": message }))
    }
}

/// A published notification
///
/// `id` is the decimal form of the topic-local sequence number and is only
/// meaningful within its topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
}

impl Event {
    /// The topic-local sequence number, if `id` is numeric
    pub fn sequence(&self) -> Option<u64> {
        self.id.parse().ok()
    }

    /// Render the `{id, type, data}` envelope
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [
            EventKind::Status,
            EventKind::Token,
            EventKind::Progress,
            EventKind::Final,
            EventKind::Error,
        ] {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("report".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(EventKind::Final.is_terminal());
        assert!(EventKind::Error.is_terminal());
        assert!(!EventKind::Token.is_terminal());
        assert!(!EventKind::Status.is_terminal());
    }

    #[test]
    fn test_envelope_shape() {
        let event = Event {
            id: "7".to_string(),
            kind: EventKind::Token,
            data: json!({"text": "hi"}),
        };
        let json = event.to_json().unwrap();
        assert_eq!(json, r#"{"id":"7","type":"token","data":{"text":"hi"}}"#);
        assert_eq!(event.sequence(), Some(7));
    }

    #[test]
    fn test_payload_constructors() {
        let payload = Payload::error("LLM_TIMEOUT", "upstream timed out");
        assert_eq!(payload.kind, EventKind::Error);
        assert_eq!(payload.data["code"], "LLM_TIMEOUT");

        let payload = Payload::progress(512);
        assert_eq!(payload.data["tokens"], 512);

        let payload = Payload::final_report("r-1");
        assert_eq!(payload.data["report_id"], "r-1");
    }
}
