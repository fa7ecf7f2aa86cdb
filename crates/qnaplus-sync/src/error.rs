//! Error types for the sync pipeline.

use qnaplus_sync_core::CoreError;
use qnaplus_sync_realtime::RealtimeError;
use qnaplus_sync_store::StoreError;
use thiserror::Error;

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Realtime transport error.
    #[error("realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    /// Domain type error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Payload encoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The process cannot start: store unreachable or never bootstrapped.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// The cron scheduler rejected a job or failed to run.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// An external collaborator (exporter, probe) failed.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },
}

impl From<tokio_cron_scheduler::JobSchedulerError> for SyncError {
    fn from(e: tokio_cron_scheduler::JobSchedulerError) -> Self {
        SyncError::Scheduler(e.to_string())
    }
}

/// Failure of a single notifier call. The chunk stays in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notify failed: {0}")]
pub struct NotifyError(pub String);

impl NotifyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, SyncError>;
