//! Broker error types

use thiserror::Error;

/// Errors returned to producers by `Broker::publish`
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The payload could not be serialized to JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The broker has been stopped and accepts no further events
    #[error("Broker is stopped")]
    Stopped,
}

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(BrokerError::Stopped.to_string(), "Broker is stopped");

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: BrokerError = json_err.into();
        assert!(err.to_string().starts_with("Serialization error:"));
    }
}
