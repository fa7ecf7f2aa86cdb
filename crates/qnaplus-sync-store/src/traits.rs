//! Store trait: the abstract interface for mirror persistence.
//!
//! This trait keeps the reconciler, dispatcher and handlers storage-agnostic.
//! Implementations include SQLite (primary) and in-memory (for tests).

use std::collections::BTreeMap;

use async_trait::async_trait;
use qnaplus_sync_core::{
    DomainEvent, EventId, EventKind, ForumState, ForumTransition, Frontier, Question, QuestionId,
};

use crate::error::Result;

/// Outcome of upserting a batch of questions.
///
/// Only rows whose content changed are written; see
/// [`Question::content_differs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Ids that were not stored before.
    pub inserted: Vec<QuestionId>,
    /// Ids whose stored content was rewritten.
    pub updated: Vec<QuestionId>,
    /// Number of questions that matched their stored copy.
    pub unchanged: usize,
}

impl UpsertReport {
    /// Whether anything was written.
    pub fn is_dirty(&self) -> bool {
        !self.inserted.is_empty() || !self.updated.is_empty()
    }

    pub(crate) fn record(&mut self, stored: Option<&Question>, incoming: &Question) -> bool {
        match stored {
            None => {
                self.inserted.push(incoming.id);
                true
            }
            Some(stored) if stored.content_differs(incoming) => {
                self.updated.push(incoming.id);
                true
            }
            Some(_) => {
                self.unchanged += 1;
                false
            }
        }
    }
}

/// A pending outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: EventId,
    pub event: DomainEvent,
}

/// The Store trait: async interface for mirror persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Atomic units**: `resolve_failures`, `apply_update` and
///   `update_forum_states` each commit all of their writes or none.
/// - **Change-only writes**: a question identical to its stored copy is not
///   rewritten.
/// - **Outbox**: events stay stored until `delete_events` names them.
///   Concurrent drains may observe the same rows; deleting an id twice is
///   harmless.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Health
    // ─────────────────────────────────────────────────────────────────────────

    /// Round-trip to the backend.
    async fn ping(&self) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Frontier & Failure Set
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the singleton frontier row, if bootstrapped.
    async fn get_frontier(&self) -> Result<Option<Frontier>>;

    /// Insert or overwrite the frontier row.
    async fn save_frontier(&self, frontier: &Frontier) -> Result<()>;

    /// Get all ids that failed to fetch, ascending.
    async fn get_failures(&self) -> Result<Vec<QuestionId>>;

    /// Replace the failure set with `ids`.
    async fn replace_failures(&self, ids: &[QuestionId]) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Questions
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a stored question by id.
    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>>;

    /// Get the stored questions among `ids`, ascending by id.
    async fn get_questions(&self, ids: &[QuestionId]) -> Result<Vec<Question>>;

    /// Get every stored question, ascending by id.
    async fn all_questions(&self) -> Result<Vec<Question>>;

    /// Get answered questions asked at or after `asked_after_ms`.
    async fn questions_asked_since(&self, asked_after_ms: i64) -> Result<Vec<Question>>;

    /// Upsert questions recovered from the failure set and drop their ids
    /// from it, atomically.
    async fn resolve_failures(&self, questions: &[Question]) -> Result<UpsertReport>;

    /// Upsert questions and append `events` to the outbox, atomically.
    async fn apply_update(
        &self,
        questions: &[Question],
        events: &[DomainEvent],
    ) -> Result<UpsertReport>;

    // ─────────────────────────────────────────────────────────────────────────
    // Outbox
    // ─────────────────────────────────────────────────────────────────────────

    /// Append events, returning their new ids in order.
    async fn append_events(&self, events: &[DomainEvent]) -> Result<Vec<EventId>>;

    /// Snapshot every pending event, grouped by kind in append order.
    async fn drain_grouped(&self) -> Result<BTreeMap<EventKind, Vec<OutboxEntry>>>;

    /// Delete the named events. Returns how many rows were removed.
    async fn delete_events(&self, ids: &[EventId]) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Forum State
    // ─────────────────────────────────────────────────────────────────────────

    /// Get every known program state, ordered by program.
    async fn get_forum_states(&self) -> Result<Vec<ForumState>>;

    /// Persist probed states. Programs whose `open` flag flipped are
    /// returned and get a `forum_change` event in the same transaction.
    /// A program seen for the first time is stored without a transition.
    async fn update_forum_states(&self, states: &[ForumState]) -> Result<Vec<ForumTransition>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Renotify Queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue stored questions for re-announcement. Unknown ids are ignored.
    /// Returns how many ids were newly queued.
    async fn queue_renotify(&self, ids: &[QuestionId]) -> Result<usize>;

    /// The queued questions, ascending by id.
    async fn get_renotify_queue(&self) -> Result<Vec<Question>>;

    /// Remove the named ids from the queue. Returns how many were removed.
    async fn clear_renotify_queue(&self, ids: &[QuestionId]) -> Result<usize>;
}

/// Extension helpers built on [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    /// Keep only ids that still have no stored question.
    async fn still_missing(&self, ids: &[QuestionId]) -> Result<Vec<QuestionId>> {
        let found = self.get_questions(ids).await?;
        Ok(ids
            .iter()
            .copied()
            .filter(|id| !found.iter().any(|q| q.id == *id))
            .collect())
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
