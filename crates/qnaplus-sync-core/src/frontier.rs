//! The reconciliation frontier.
//!
//! The frontier is the persisted pointer marking the oldest question not yet
//! known to be answered. Every forward scan of the upstream forum starts
//! there, so it only moves backwards when a previously failing question
//! turns out to still be open.

use serde::{Deserialize, Serialize};

use crate::question::Question;
use crate::types::QuestionId;

/// Singleton frontier row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontier {
    pub current_season: String,
    pub oldest_unanswered_id: QuestionId,
}

impl Frontier {
    pub fn new(current_season: impl Into<String>, oldest_unanswered_id: QuestionId) -> Self {
        Self {
            current_season: current_season.into(),
            oldest_unanswered_id,
        }
    }

    /// Copy of this frontier pointing at `id`.
    pub fn with_oldest(&self, id: QuestionId) -> Self {
        Self {
            current_season: self.current_season.clone(),
            oldest_unanswered_id: id,
        }
    }
}

/// The lowest-id question that is unanswered and belongs to `season`.
pub fn oldest_unanswered<'a, I>(questions: I, season: &str) -> Option<&'a Question>
where
    I: IntoIterator<Item = &'a Question>,
{
    questions
        .into_iter()
        .filter(|q| q.is_open_in(season))
        .min_by_key(|q| q.id)
}

/// The smaller of two optional ids.
pub fn min_id(a: Option<QuestionId>, b: Option<QuestionId>) -> Option<QuestionId> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
