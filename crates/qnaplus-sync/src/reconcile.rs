//! The reconciliation engine.
//!
//! One run walks the upstream forum from the stored frontier, retries the
//! persisted failure set, writes what changed, and moves the frontier.
//! A run keeps no state in memory between invocations: if any write fails
//! the rest of the run is abandoned and the next run re-derives everything
//! from the store.
//!
//! ## Steps
//!
//! 1. Load the frontier (required) and the failure set.
//! 2. Failure pass: range-fetch failed ids in batches, pausing between them.
//! 3. Persist resolved questions and drop them from the failure set.
//! 4. Start id: the older of the stored frontier and the oldest unanswered
//!    question the failure pass found.
//! 5. Forward pass: iterative fetch from the start id.
//! 6. Questions that flipped to answered become `answered` outbox events.
//! 7. Change-only upsert of the forward pass, atomically with step 6.
//! 8. Replace the failure set with every failure still missing a question.
//! 9. Move the frontier. A start id that is still failing is fetched once
//!    more on its own and decides the frontier if it is open or unreachable.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use qnaplus_sync_core::{
    classify, min_id, oldest_unanswered, DomainEvent, EventKind, Frontier, Question, QuestionId,
    RecordChange,
};
use qnaplus_sync_store::{Store, StoreExt};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fetch::{with_timeout, FetchOutcome, Fetcher};

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Whether anything written warrants downstream propagation.
    pub storage_dirty: bool,
    /// `answered` events queued in the outbox.
    pub answered: usize,
    /// Size of the failure set after the run.
    pub failures: usize,
    /// Frontier after the run; `None` if it was left untouched.
    pub frontier: Option<QuestionId>,
}

/// Tunables for a reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub failure_batch_size: usize,
    pub failure_batch_interval: Duration,
    pub fetch_timeout: Duration,
}

impl From<&SyncConfig> for ReconcileOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            failure_batch_size: config.failure_batch_size,
            failure_batch_interval: config.failure_batch_interval,
            fetch_timeout: config.fetch_timeout,
        }
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

/// Drives reconciliation runs against a store and an upstream fetcher.
pub struct Reconciler {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn Fetcher>,
    options: ReconcileOptions,
}

/// Result of the failure pass.
struct FailurePass {
    resolved: Vec<Question>,
    still_failing: Vec<QuestionId>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, fetcher: Arc<dyn Fetcher>, options: ReconcileOptions) -> Self {
        Self {
            store,
            fetcher,
            options,
        }
    }

    /// Run one reconciliation pass.
    ///
    /// Fails only if the frontier is missing or a store operation fails;
    /// upstream fetch failures are recorded in the failure set instead.
    pub async fn run(&self) -> Result<UpdateResult> {
        let span = info_span!("reconcile");
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<UpdateResult> {
        let frontier = self
            .store
            .get_frontier()
            .await?
            .ok_or_else(|| SyncError::Bootstrap("frontier row is missing".into()))?;
        let failures = self.store.get_failures().await?;
        let season = frontier.current_season.as_str();
        let mut result = UpdateResult::default();

        info!(
            oldest_unanswered_id = %frontier.oldest_unanswered_id,
            failures = failures.len(),
            "starting reconciliation"
        );

        // Failure pass.
        let pass = self.failure_pass(&failures).await;
        if !pass.resolved.is_empty() {
            let ids: Vec<_> = pass.resolved.iter().map(|q| q.id).collect();
            let report = self
                .store
                .resolve_failures(&pass.resolved)
                .await
                .map_err(|e| persist_failed("resolve failures", &ids, e))?;
            result.storage_dirty |= report.is_dirty();
            info!(resolved = ids.len(), "resolved previously failing questions");
        }

        let failure_oldest = oldest_unanswered(&pass.resolved, season).map(|q| q.id);
        let start = min_id(failure_oldest, Some(frontier.oldest_unanswered_id))
            .unwrap_or(frontier.oldest_unanswered_id);
        if start != frontier.oldest_unanswered_id {
            info!(start = %start, stored = %frontier.oldest_unanswered_id, "rewinding start to resolved failure");
        }

        // Forward pass.
        let forward = with_timeout(
            self.options.fetch_timeout,
            &[start],
            self.fetcher.fetch_iterative_from(start),
        )
        .await;
        debug!(
            questions = forward.questions.len(),
            failures = forward.failures.len(),
            "forward pass complete"
        );

        let events = self.answered_events(&forward.questions).await?;
        let report = self
            .store
            .apply_update(&forward.questions, &events)
            .await
            .map_err(|e| persist_failed("apply forward pass", &[start], e))?;
        result.answered = events.len();
        result.storage_dirty |= !events.is_empty() || report.is_dirty();
        if !events.is_empty() {
            info!(answered = events.len(), "queued answered events");
        }

        // Failure set: union, dedup, keep only ids still missing.
        let candidates: BTreeSet<QuestionId> = pass
            .still_failing
            .iter()
            .chain(forward.failures.iter())
            .copied()
            .collect();
        let candidates: Vec<_> = candidates.into_iter().collect();
        let mut validated = self.store.still_missing(&candidates).await?;
        self.store
            .replace_failures(&validated)
            .await
            .map_err(|e| persist_failed("replace failures", &validated, e))?;

        // Frontier.
        let derived = if validated.contains(&start) {
            match self.refetch_start(start, season).await? {
                StartOutcome::Unreachable => {
                    warn!(start = %start, "start id still failing, holding frontier on it");
                    Some(start)
                }
                StartOutcome::Resolved { open, dirty } => {
                    validated.retain(|id| *id != start);
                    result.storage_dirty |= dirty;
                    if open {
                        Some(start)
                    } else {
                        oldest_unanswered(&forward.questions, season).map(|q| q.id)
                    }
                }
            }
        } else {
            oldest_unanswered(&forward.questions, season).map(|q| q.id)
        };
        result.failures = validated.len();

        let Some(oldest) = min_id(derived, failure_oldest) else {
            info!(
                oldest_unanswered_id = %frontier.oldest_unanswered_id,
                "no unanswered question found, frontier unchanged"
            );
            return Ok(result);
        };

        let next = frontier.with_oldest(oldest);
        self.save_frontier(&next).await?;
        result.frontier = Some(oldest);

        info!(
            oldest_unanswered_id = %oldest,
            failures = result.failures,
            storage_dirty = result.storage_dirty,
            "reconciliation complete"
        );
        Ok(result)
    }

    async fn failure_pass(&self, failures: &[QuestionId]) -> FailurePass {
        let mut outcome = FetchOutcome::default();
        let batch_size = self.options.failure_batch_size.max(1);

        for (i, batch) in failures.chunks(batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.options.failure_batch_interval).await;
            }
            let fetched = with_timeout(
                self.options.fetch_timeout,
                batch,
                self.fetcher.fetch_range(batch),
            )
            .await;
            debug!(
                batch = i,
                requested = batch.len(),
                resolved = fetched.questions.len(),
                "failure batch fetched"
            );
            outcome.merge(fetched);
        }

        // Only requested ids count, and a resolved id is never still failing.
        let requested: BTreeSet<_> = failures.iter().copied().collect();
        outcome.questions.retain(|q| requested.contains(&q.id));
        let resolved: BTreeSet<_> = outcome.questions.iter().map(|q| q.id).collect();
        let still_failing: Vec<_> = requested
            .iter()
            .copied()
            .filter(|id| !resolved.contains(id))
            .collect();

        if !still_failing.is_empty() {
            debug!(still_failing = still_failing.len(), "failure pass left ids unresolved");
        }
        FailurePass {
            resolved: outcome.questions,
            still_failing,
        }
    }

    /// `answered` events for forward-pass questions whose stored copy was
    /// still unanswered.
    async fn answered_events(&self, questions: &[Question]) -> Result<Vec<DomainEvent>> {
        if questions.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<_> = questions.iter().map(|q| q.id).collect();
        let stored: HashMap<QuestionId, Question> = self
            .store
            .get_questions(&ids)
            .await?
            .into_iter()
            .map(|q| (q.id, q))
            .collect();

        let changes: Vec<RecordChange> = questions
            .iter()
            .filter_map(|q| {
                stored
                    .get(&q.id)
                    .map(|old| RecordChange::new(old.clone(), q.clone()))
            })
            .collect();

        Ok(classify(&changes)
            .into_iter()
            .filter(|event| event.kind() == EventKind::Answered)
            .collect())
    }

    /// Fetch the start id on its own after it landed in the failure set.
    async fn refetch_start(&self, start: QuestionId, season: &str) -> Result<StartOutcome> {
        let ids = [start];
        let outcome = with_timeout(
            self.options.fetch_timeout,
            &ids,
            self.fetcher.fetch_range(&ids),
        )
        .await;

        let Some(question) = outcome.questions.into_iter().find(|q| q.id == start) else {
            return Ok(StartOutcome::Unreachable);
        };

        let open = question.is_open_in(season);
        let report = self
            .store
            .resolve_failures(std::slice::from_ref(&question))
            .await
            .map_err(|e| persist_failed("resolve start id", &ids, e))?;
        debug!(start = %start, open, "start id resolved on direct fetch");

        Ok(StartOutcome::Resolved {
            open,
            dirty: report.is_dirty(),
        })
    }

    async fn save_frontier(&self, frontier: &Frontier) -> Result<()> {
        self.store.save_frontier(frontier).await.map_err(|e| {
            persist_failed("save frontier", &[frontier.oldest_unanswered_id], e)
        })
    }
}

/// What a direct fetch of the start id found.
enum StartOutcome {
    /// Resolved and persisted. `open` if unanswered in the current season.
    Resolved { open: bool, dirty: bool },
    /// Still failing.
    Unreachable,
}

fn persist_failed(step: &str, ids: &[QuestionId], e: qnaplus_sync_store::StoreError) -> SyncError {
    let ids: Vec<String> = ids.iter().take(20).map(ToString::to_string).collect();
    error!(step, ids = ?ids, error = %e, "persist failed, abandoning run");
    SyncError::Store(e)
}
