//! Error types for the realtime module.

use thiserror::Error;

/// Server messages that mean the channel's credentials went stale. The
/// misspelled form is what the server has historically sent.
const TOKEN_EXPIRED_PREFIXES: [&str; 2] = ["\"Token as expired", "\"Token has expired"];

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// No channel is registered or live for the topic.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Payload could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The manager's event loop is gone.
    #[error("subscription manager stopped")]
    Stopped,
}

/// An error reported by the server for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ChannelError {
    pub message: String,
}

impl ChannelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Whether this error means the credentials expired and a fresh
    /// channel is likely to succeed.
    pub fn is_token_expired(&self) -> bool {
        TOKEN_EXPIRED_PREFIXES
            .iter()
            .any(|prefix| self.message.starts_with(prefix))
    }
}

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expired_detection() {
        assert!(ChannelError::new("\"Token as expired 3 seconds ago\"").is_token_expired());
        assert!(ChannelError::new("\"Token has expired 3 seconds ago\"").is_token_expired());
        assert!(!ChannelError::new("Token has expired").is_token_expired());
        assert!(!ChannelError::new("connection refused").is_token_expired());
    }
}
