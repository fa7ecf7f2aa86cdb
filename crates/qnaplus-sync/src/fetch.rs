//! Upstream fetch collaborator.
//!
//! Scraping the forum is not part of this crate. The reconciler only needs
//! two operations, and both report per-item failures as values.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use qnaplus_sync_core::{Question, QuestionId};
use tracing::warn;

/// Questions that resolved plus ids that did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub questions: Vec<Question>,
    pub failures: Vec<QuestionId>,
}

impl FetchOutcome {
    pub fn new(questions: Vec<Question>, failures: Vec<QuestionId>) -> Self {
        Self {
            questions,
            failures,
        }
    }

    /// Every id failed.
    pub fn failed(ids: impl IntoIterator<Item = QuestionId>) -> Self {
        Self {
            questions: Vec::new(),
            failures: ids.into_iter().collect(),
        }
    }

    pub fn merge(&mut self, other: FetchOutcome) {
        self.questions.extend(other.questions);
        self.failures.extend(other.failures);
    }
}

/// Fetches questions from the upstream forum.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch exactly `ids`. Ids that could not be fetched are failures.
    async fn fetch_range(&self, ids: &[QuestionId]) -> FetchOutcome;

    /// Fetch `start` and every later question until the forum runs out.
    async fn fetch_iterative_from(&self, start: QuestionId) -> FetchOutcome;
}

/// Run `fetch` under `limit`; on expiry every id in `on_timeout` fails.
pub(crate) async fn with_timeout<F>(
    limit: Duration,
    on_timeout: &[QuestionId],
    fetch: F,
) -> FetchOutcome
where
    F: Future<Output = FetchOutcome>,
{
    match tokio::time::timeout(limit, fetch).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(
                timeout_ms = limit.as_millis() as u64,
                ids = on_timeout.len(),
                "upstream fetch timed out"
            );
            FetchOutcome::failed(on_timeout.iter().copied())
        }
    }
}
