//! Error types for qnaplus-sync-core.

use thiserror::Error;

/// Core errors that can occur while handling questions and events.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid question id: {0:?}")]
    InvalidQuestionId(String),

    #[error("unknown event kind: {0:?}")]
    UnknownEventKind(String),

    #[error("malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("encoding error: {0}")]
    EncodingError(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
