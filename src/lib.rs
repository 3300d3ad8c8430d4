//! Persistent WebSocket subscription manager for the OKEx market-data stream
//!
//! Opens, tracks, health-checks and reconnects many concurrent feed
//! connections, optionally multiplexing several channels over one socket.

pub mod engine;
pub mod exchanges;
pub mod infrastructure;
pub mod ws;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use engine::{StreamClient, StreamEngine};
pub use infrastructure::config::{Config, FeedConfig, LoggingConfig, StreamConfig};
pub use ws::{EndpointId, OpenedAction, SubscribeRequest, Topics};

use thiserror::Error;

/// Main error type for the stream manager
#[derive(Error, Debug)]
pub enum StreamError {
    /// Invalid subscribe input. Nothing was created.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] ws::TransportError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Reconnect error: {0}")]
    Reconnect(String),

    #[error("Stream engine stopped")]
    EngineStopped,
}

/// Payload could not be decoded into structured data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

/// Result type alias
pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::Config("duplicate topic".to_string());
        assert_eq!(err.to_string(), "Configuration error: duplicate topic");

        let err: StreamError = DecodeError("expected value".to_string()).into();
        assert_eq!(err.to_string(), "Decode error: expected value");
    }

    #[test]
    fn test_transport_error_converts() {
        let err: StreamError = ws::TransportError::NotConnected.into();
        assert!(matches!(err, StreamError::WebSocket(_)));
        assert_eq!(err.to_string(), "WebSocket error: Not connected");
    }
}
