//! In-process stand-ins for the pipeline's external collaborators.
//!
//! Each fake records what it was asked to do so tests can assert on it, and
//! can be told to fail.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use qnaplus_sync::{Exporter, FetchOutcome, Fetcher, Notifier, NotifyError, PrecheckProbe};
use qnaplus_sync_core::{
    DomainEvent, EventId, EventKind, ForumState, ForumTransition, Frontier, Question, QuestionId,
};
use qnaplus_sync_store::{OutboxEntry, Store, StoreError, UpsertReport};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetcher
// ─────────────────────────────────────────────────────────────────────────────

/// A call made to [`ScriptedFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchCall {
    Range(Vec<QuestionId>),
    From(QuestionId),
}

#[derive(Default)]
struct Upstream {
    questions: BTreeMap<QuestionId, Question>,
    failing: BTreeSet<QuestionId>,
    flaky: BTreeSet<QuestionId>,
    delay: Option<Duration>,
    calls: Vec<FetchCall>,
}

/// An upstream forum held in memory.
///
/// Questions can be published, edited and marked failing between runs. A
/// failing id is reported as a failure by both fetch operations even if the
/// question exists.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    upstream: Arc<Mutex<Upstream>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_questions(questions: impl IntoIterator<Item = Question>) -> Self {
        let fetcher = Self::new();
        fetcher.set_all(questions);
        fetcher
    }

    /// Publish or overwrite one question upstream.
    pub fn set(&self, question: Question) {
        lock(&self.upstream).questions.insert(question.id, question);
    }

    pub fn set_all(&self, questions: impl IntoIterator<Item = Question>) {
        let mut upstream = lock(&self.upstream);
        for q in questions {
            upstream.questions.insert(q.id, q);
        }
    }

    /// Make `ids` fail until healed.
    pub fn fail(&self, ids: impl IntoIterator<Item = QuestionId>) {
        lock(&self.upstream).failing.extend(ids);
    }

    /// Make `ids` fail the next time a fetch touches them.
    pub fn fail_once(&self, ids: impl IntoIterator<Item = QuestionId>) {
        lock(&self.upstream).flaky.extend(ids);
    }

    pub fn heal(&self, ids: impl IntoIterator<Item = QuestionId>) {
        let mut upstream = lock(&self.upstream);
        for id in ids {
            upstream.failing.remove(&id);
        }
    }

    pub fn heal_all(&self) {
        lock(&self.upstream).failing.clear();
    }

    /// Sleep this long before answering every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        lock(&self.upstream).delay = delay;
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        lock(&self.upstream).calls.clone()
    }

    fn record(&self, call: FetchCall) -> Option<Duration> {
        let mut upstream = lock(&self.upstream);
        upstream.calls.push(call);
        upstream.delay
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch_range(&self, ids: &[QuestionId]) -> FetchOutcome {
        if let Some(delay) = self.record(FetchCall::Range(ids.to_vec())) {
            tokio::time::sleep(delay).await;
        }
        let mut upstream = lock(&self.upstream);
        let mut outcome = FetchOutcome::default();
        for id in ids {
            let flaked = upstream.flaky.remove(id);
            match upstream.questions.get(id) {
                Some(q) if !flaked && !upstream.failing.contains(id) => {
                    outcome.questions.push(q.clone())
                }
                _ => outcome.failures.push(*id),
            }
        }
        outcome
    }

    async fn fetch_iterative_from(&self, start: QuestionId) -> FetchOutcome {
        if let Some(delay) = self.record(FetchCall::From(start)) {
            tokio::time::sleep(delay).await;
        }
        let mut upstream = lock(&self.upstream);
        let flaked = upstream.flaky.split_off(&start);
        let questions = upstream
            .questions
            .range(start..)
            .filter(|(id, _)| !upstream.failing.contains(*id) && !flaked.contains(*id))
            .map(|(_, q)| q.clone())
            .collect();
        let failures = upstream
            .failing
            .range(start..)
            .chain(flaked.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        FetchOutcome::new(questions, failures)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifier
// ─────────────────────────────────────────────────────────────────────────────

/// One delivered chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub kind: EventKind,
    pub group_key: String,
    pub events: Vec<DomainEvent>,
}

#[derive(Default)]
struct NotifierState {
    delivered: Vec<Delivery>,
    failing_groups: HashSet<String>,
    fail_next: usize,
    attempts: usize,
}

/// Records every delivered chunk.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every chunk for `group_key` until [`Self::recover_group`].
    pub fn fail_group(&self, group_key: &str) {
        lock(&self.state).failing_groups.insert(group_key.to_string());
    }

    pub fn recover_group(&self, group_key: &str) {
        lock(&self.state).failing_groups.remove(group_key);
    }

    /// Fail the next `n` calls regardless of group.
    pub fn fail_next(&self, n: usize) {
        lock(&self.state).fail_next = n;
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        lock(&self.state).delivered.clone()
    }

    /// Every delivered event, flattened in delivery order.
    pub fn delivered_events(&self) -> Vec<DomainEvent> {
        lock(&self.state)
            .delivered
            .iter()
            .flat_map(|d| d.events.iter().cloned())
            .collect()
    }

    /// Ids of questions in delivered events of `kind`.
    pub fn delivered_ids(&self, kind: EventKind) -> Vec<QuestionId> {
        lock(&self.state)
            .delivered
            .iter()
            .filter(|d| d.kind == kind)
            .flat_map(|d| d.events.iter().filter_map(|e| e.question().map(|q| q.id)))
            .collect()
    }

    /// Calls made, successful or not.
    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        kind: EventKind,
        group_key: &str,
        events: &[DomainEvent],
    ) -> Result<(), NotifyError> {
        let mut state = lock(&self.state);
        state.attempts += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(NotifyError::new("scripted failure"));
        }
        if state.failing_groups.contains(group_key) {
            return Err(NotifyError::new(format!("group {group_key} unavailable")));
        }
        state.delivered.push(Delivery {
            kind,
            group_key: group_key.to_string(),
            events: events.to_vec(),
        });
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exporter
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps every exported file in memory.
#[derive(Clone, Default)]
pub struct RecordingExporter {
    files: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn exports(&self) -> usize {
        lock(&self.files).len()
    }

    /// The last export, decoded as questions.
    pub fn last_questions(&self) -> Option<Vec<Question>> {
        lock(&self.files)
            .last()
            .and_then(|(_, bytes)| serde_json::from_slice(bytes).ok())
    }

    pub fn last_name(&self) -> Option<String> {
        lock(&self.files).last().map(|(name, _)| name.clone())
    }
}

#[async_trait]
impl Exporter for RecordingExporter {
    async fn export(&self, name: &str, contents: Vec<u8>) -> Result<(), String> {
        if *lock(&self.failing) {
            return Err("storage bucket unavailable".to_string());
        }
        lock(&self.files).push((name.to_string(), contents));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Precheck probe
// ─────────────────────────────────────────────────────────────────────────────

/// Answers `exists` from a fixed set of ids.
#[derive(Clone, Default)]
pub struct StaticProbe {
    existing: Arc<Mutex<HashSet<QuestionId>>>,
}

impl StaticProbe {
    pub fn new(existing: impl IntoIterator<Item = QuestionId>) -> Self {
        Self {
            existing: Arc::new(Mutex::new(existing.into_iter().collect())),
        }
    }

    pub fn insert(&self, id: QuestionId) {
        lock(&self.existing).insert(id);
    }
}

#[async_trait]
impl PrecheckProbe for StaticProbe {
    async fn exists(&self, id: QuestionId) -> bool {
        lock(&self.existing).contains(&id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// A write operation [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    SaveFrontier,
    ReplaceFailures,
    ResolveFailures,
    ApplyUpdate,
    AppendEvents,
}

/// Wraps a store and fails chosen writes a set number of times.
///
/// A failed write leaves the wrapped store untouched. Reads always pass
/// through.
#[derive(Clone)]
pub struct FaultyStore {
    inner: Arc<dyn Store>,
    faults: Arc<Mutex<HashMap<StoreOp, usize>>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: StoreOp, times: usize) {
        *lock(&self.faults).entry(op).or_default() += times;
    }

    pub fn fail_once(&self, op: StoreOp) {
        self.fail_next(op, 1);
    }

    /// Faults armed but not yet hit.
    pub fn armed(&self, op: StoreOp) -> usize {
        lock(&self.faults).get(&op).copied().unwrap_or(0)
    }

    fn check(&self, op: StoreOp) -> qnaplus_sync_store::Result<()> {
        let mut faults = lock(&self.faults);
        match faults.get_mut(&op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(StoreError::Io(io::Error::other(format!(
                    "injected {op:?} failure"
                ))))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn ping(&self) -> qnaplus_sync_store::Result<()> {
        self.inner.ping().await
    }

    async fn get_frontier(&self) -> qnaplus_sync_store::Result<Option<Frontier>> {
        self.inner.get_frontier().await
    }

    async fn save_frontier(&self, frontier: &Frontier) -> qnaplus_sync_store::Result<()> {
        self.check(StoreOp::SaveFrontier)?;
        self.inner.save_frontier(frontier).await
    }

    async fn get_failures(&self) -> qnaplus_sync_store::Result<Vec<QuestionId>> {
        self.inner.get_failures().await
    }

    async fn replace_failures(&self, ids: &[QuestionId]) -> qnaplus_sync_store::Result<()> {
        self.check(StoreOp::ReplaceFailures)?;
        self.inner.replace_failures(ids).await
    }

    async fn get_question(&self, id: QuestionId) -> qnaplus_sync_store::Result<Option<Question>> {
        self.inner.get_question(id).await
    }

    async fn get_questions(&self, ids: &[QuestionId]) -> qnaplus_sync_store::Result<Vec<Question>> {
        self.inner.get_questions(ids).await
    }

    async fn all_questions(&self) -> qnaplus_sync_store::Result<Vec<Question>> {
        self.inner.all_questions().await
    }

    async fn questions_asked_since(
        &self,
        asked_after_ms: i64,
    ) -> qnaplus_sync_store::Result<Vec<Question>> {
        self.inner.questions_asked_since(asked_after_ms).await
    }

    async fn resolve_failures(
        &self,
        questions: &[Question],
    ) -> qnaplus_sync_store::Result<UpsertReport> {
        self.check(StoreOp::ResolveFailures)?;
        self.inner.resolve_failures(questions).await
    }

    async fn apply_update(
        &self,
        questions: &[Question],
        events: &[DomainEvent],
    ) -> qnaplus_sync_store::Result<UpsertReport> {
        self.check(StoreOp::ApplyUpdate)?;
        self.inner.apply_update(questions, events).await
    }

    async fn append_events(&self, events: &[DomainEvent]) -> qnaplus_sync_store::Result<Vec<EventId>> {
        self.check(StoreOp::AppendEvents)?;
        self.inner.append_events(events).await
    }

    async fn drain_grouped(
        &self,
    ) -> qnaplus_sync_store::Result<BTreeMap<EventKind, Vec<OutboxEntry>>> {
        self.inner.drain_grouped().await
    }

    async fn delete_events(&self, ids: &[EventId]) -> qnaplus_sync_store::Result<usize> {
        self.inner.delete_events(ids).await
    }

    async fn get_forum_states(&self) -> qnaplus_sync_store::Result<Vec<ForumState>> {
        self.inner.get_forum_states().await
    }

    async fn update_forum_states(
        &self,
        states: &[ForumState],
    ) -> qnaplus_sync_store::Result<Vec<ForumTransition>> {
        self.inner.update_forum_states(states).await
    }

    async fn queue_renotify(&self, ids: &[QuestionId]) -> qnaplus_sync_store::Result<usize> {
        self.inner.queue_renotify(ids).await
    }

    async fn get_renotify_queue(&self) -> qnaplus_sync_store::Result<Vec<Question>> {
        self.inner.get_renotify_queue().await
    }

    async fn clear_renotify_queue(&self, ids: &[QuestionId]) -> qnaplus_sync_store::Result<usize> {
        self.inner.clear_renotify_queue(ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::question;

    #[tokio::test]
    async fn test_scripted_fetcher_reports_failures() {
        let fetcher = ScriptedFetcher::with_questions((1..=5).map(|i| question(i).build()));
        fetcher.fail([QuestionId(3)]);

        let range = fetcher
            .fetch_range(&[QuestionId(2), QuestionId(3), QuestionId(9)])
            .await;
        assert_eq!(range.questions.len(), 1);
        assert_eq!(range.failures, vec![QuestionId(3), QuestionId(9)]);

        let forward = fetcher.fetch_iterative_from(QuestionId(2)).await;
        let ids: Vec<_> = forward.questions.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![QuestionId(2), QuestionId(4), QuestionId(5)]);
        assert_eq!(forward.failures, vec![QuestionId(3)]);

        fetcher.heal_all();
        fetcher.fail_once([QuestionId(4)]);
        let forward = fetcher.fetch_iterative_from(QuestionId(2)).await;
        assert_eq!(forward.failures, vec![QuestionId(4)]);
        let forward = fetcher.fetch_iterative_from(QuestionId(2)).await;
        assert_eq!(forward.questions.len(), 4);
        assert_eq!(fetcher.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_recording_notifier_failures() {
        let notifier = RecordingNotifier::new();
        let event = DomainEvent::answered(question(1).answered("Yes.").build());

        notifier.fail_next(1);
        assert!(notifier
            .notify(EventKind::Answered, "V5RC", &[event.clone()])
            .await
            .is_err());
        notifier.fail_group("VIQRC");
        assert!(notifier
            .notify(EventKind::Answered, "VIQRC", &[event.clone()])
            .await
            .is_err());
        assert!(notifier
            .notify(EventKind::Answered, "V5RC", &[event])
            .await
            .is_ok());

        assert_eq!(notifier.attempts(), 3);
        assert_eq!(notifier.delivered_ids(EventKind::Answered), vec![QuestionId(1)]);
    }

    #[tokio::test]
    async fn test_faulty_store_fails_armed_writes_only() {
        let inner: Arc<dyn Store> = Arc::new(qnaplus_sync_store::MemoryStore::new());
        let store = FaultyStore::new(inner.clone());
        store.fail_once(StoreOp::ApplyUpdate);

        assert!(store.apply_update(&[question(1).build()], &[]).await.is_err());
        assert!(inner.all_questions().await.unwrap().is_empty());
        assert_eq!(store.armed(StoreOp::ApplyUpdate), 0);

        store.apply_update(&[question(1).build()], &[]).await.unwrap();
        assert_eq!(store.all_questions().await.unwrap().len(), 1);
    }
}
