//! Operator-requested replays.
//!
//! A replay re-announces stored questions through the outbox without
//! touching their stored state.

use qnaplus_sync_core::{replay, QuestionId};
use qnaplus_sync_store::Store;
use tracing::{info, warn};

use crate::error::Result;

/// What a replay request queued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// `replay` events appended to the outbox.
    pub queued: usize,
    /// Requested ids with no stored question.
    pub unknown: Vec<QuestionId>,
}

/// Queue a `replay` event for each stored question among `ids`.
pub async fn queue_replay(store: &dyn Store, ids: &[QuestionId]) -> Result<ReplayReport> {
    let questions = store.get_questions(ids).await?;
    let unknown: Vec<_> = ids
        .iter()
        .copied()
        .filter(|id| !questions.iter().any(|q| q.id == *id))
        .collect();
    if !unknown.is_empty() {
        warn!(unknown = ?unknown, "replay requested for unknown questions");
    }

    let events = replay(questions);
    let queued = store.append_events(&events).await?.len();
    info!(queued, "queued replay events");
    Ok(ReplayReport { queued, unknown })
}

/// Queue a `replay` event for every answered question asked at or after
/// `asked_after_ms`.
pub async fn queue_replay_since(store: &dyn Store, asked_after_ms: i64) -> Result<ReplayReport> {
    let questions = store.questions_asked_since(asked_after_ms).await?;
    let events = replay(questions);
    let queued = store.append_events(&events).await?.len();
    info!(queued, asked_after_ms, "queued replay events");
    Ok(ReplayReport {
        queued,
        unknown: Vec::new(),
    })
}
