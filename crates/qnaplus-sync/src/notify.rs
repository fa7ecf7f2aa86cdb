//! Downstream collaborators: the notifier and the static exporter.

use async_trait::async_trait;
use qnaplus_sync_core::{DomainEvent, EventKind};

use crate::error::NotifyError;

/// Delivers a chunk of events for one kind and one recipient group.
///
/// A call either delivers the whole chunk or fails. Chunks may be delivered
/// more than once, so side effects must be idempotent.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        kind: EventKind,
        group_key: &str,
        events: &[DomainEvent],
    ) -> Result<(), NotifyError>;
}

/// File name the full question list is exported under.
pub const EXPORT_FILE_NAME: &str = "questions.json";

/// Receives a serialised snapshot of every stored question.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, name: &str, contents: Vec<u8>) -> Result<(), String>;
}
