//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use uuid::Uuid;

use qnaplus_sync_core::{
    classify_forum, DomainEvent, EventId, EventKind, ForumState, ForumTransition, Frontier,
    Question, QuestionId,
};

use crate::error::{lock_poisoned, Result};
use crate::traits::{OutboxEntry, Store, UpsertReport};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    frontier: Option<Frontier>,
    failures: BTreeSet<QuestionId>,
    questions: BTreeMap<QuestionId, Question>,
    /// Outbox rows in append order.
    outbox: Vec<OutboxEntry>,
    forum: BTreeMap<String, bool>,
    renotify: BTreeSet<QuestionId>,
}

impl MemoryStoreInner {
    fn upsert(&mut self, questions: &[Question]) -> UpsertReport {
        let mut report = UpsertReport::default();
        for question in questions {
            if report.record(self.questions.get(&question.id), question) {
                self.questions.insert(question.id, question.clone());
            }
        }
        report
    }

    fn append(&mut self, events: &[DomainEvent]) -> Vec<EventId> {
        events
            .iter()
            .map(|event| {
                let id = EventId::new(Uuid::new_v4().to_string());
                self.outbox.push(OutboxEntry {
                    id: id.clone(),
                    event: event.clone(),
                });
                id
            })
            .collect()
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(lock_poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(lock_poisoned)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.read().map(|_| ())
    }

    async fn get_frontier(&self) -> Result<Option<Frontier>> {
        Ok(self.read()?.frontier.clone())
    }

    async fn save_frontier(&self, frontier: &Frontier) -> Result<()> {
        self.write()?.frontier = Some(frontier.clone());
        Ok(())
    }

    async fn get_failures(&self) -> Result<Vec<QuestionId>> {
        Ok(self.read()?.failures.iter().copied().collect())
    }

    async fn replace_failures(&self, ids: &[QuestionId]) -> Result<()> {
        self.write()?.failures = ids.iter().copied().collect();
        Ok(())
    }

    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>> {
        Ok(self.read()?.questions.get(&id).cloned())
    }

    async fn get_questions(&self, ids: &[QuestionId]) -> Result<Vec<Question>> {
        let inner = self.read()?;
        let wanted: BTreeSet<_> = ids.iter().copied().collect();
        Ok(wanted
            .iter()
            .filter_map(|id| inner.questions.get(id).cloned())
            .collect())
    }

    async fn all_questions(&self) -> Result<Vec<Question>> {
        Ok(self.read()?.questions.values().cloned().collect())
    }

    async fn questions_asked_since(&self, asked_after_ms: i64) -> Result<Vec<Question>> {
        Ok(self
            .read()?
            .questions
            .values()
            .filter(|q| q.answered && q.asked_timestamp_ms >= asked_after_ms)
            .cloned()
            .collect())
    }

    async fn resolve_failures(&self, questions: &[Question]) -> Result<UpsertReport> {
        let mut inner = self.write()?;
        let report = inner.upsert(questions);
        for question in questions {
            inner.failures.remove(&question.id);
        }
        Ok(report)
    }

    async fn apply_update(
        &self,
        questions: &[Question],
        events: &[DomainEvent],
    ) -> Result<UpsertReport> {
        let mut inner = self.write()?;
        let report = inner.upsert(questions);
        inner.append(events);
        Ok(report)
    }

    async fn append_events(&self, events: &[DomainEvent]) -> Result<Vec<EventId>> {
        Ok(self.write()?.append(events))
    }

    async fn drain_grouped(&self) -> Result<BTreeMap<EventKind, Vec<OutboxEntry>>> {
        let inner = self.read()?;
        let mut grouped: BTreeMap<EventKind, Vec<OutboxEntry>> = BTreeMap::new();
        for entry in &inner.outbox {
            grouped.entry(entry.event.kind()).or_default().push(entry.clone());
        }
        Ok(grouped)
    }

    async fn delete_events(&self, ids: &[EventId]) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.outbox.len();
        inner.outbox.retain(|entry| !ids.contains(&entry.id));
        Ok(before - inner.outbox.len())
    }

    async fn get_forum_states(&self) -> Result<Vec<ForumState>> {
        Ok(self
            .read()?
            .forum
            .iter()
            .map(|(program, open)| ForumState::new(program.clone(), *open))
            .collect())
    }

    async fn update_forum_states(&self, states: &[ForumState]) -> Result<Vec<ForumTransition>> {
        let mut inner = self.write()?;
        let mut transitions = Vec::new();
        let mut events = Vec::new();

        for state in states {
            let previous = inner.forum.insert(state.program.clone(), state.open);
            if let Some(open) = previous.filter(|open| *open != state.open) {
                let before = ForumState::new(state.program.clone(), open);
                events.extend(classify_forum(&before, state));
                transitions.push(ForumTransition {
                    before,
                    after: state.clone(),
                });
            }
        }

        inner.append(&events);
        Ok(transitions)
    }

    async fn queue_renotify(&self, ids: &[QuestionId]) -> Result<usize> {
        let mut inner = self.write()?;
        let mut queued = 0;
        for id in ids {
            if inner.questions.contains_key(id) && inner.renotify.insert(*id) {
                queued += 1;
            }
        }
        Ok(queued)
    }

    async fn get_renotify_queue(&self) -> Result<Vec<Question>> {
        let inner = self.read()?;
        Ok(inner
            .renotify
            .iter()
            .filter_map(|id| inner.questions.get(id).cloned())
            .collect())
    }

    async fn clear_renotify_queue(&self, ids: &[QuestionId]) -> Result<usize> {
        let mut inner = self.write()?;
        Ok(ids.iter().filter(|id| inner.renotify.remove(*id)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_question(id: u64, answered: bool) -> Question {
        Question {
            id: QuestionId(id),
            url: String::new(),
            program: "VEXU".into(),
            season: "2024-2025".into(),
            author: String::new(),
            title: String::new(),
            question: format!("question {id}"),
            question_raw: String::new(),
            answer: answered.then(|| "Answer.".to_string()),
            answer_raw: None,
            asked_timestamp: String::new(),
            asked_timestamp_ms: 0,
            answered_timestamp: None,
            answered_timestamp_ms: None,
            answered,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let report = store.apply_update(&[make_question(1, false)], &[]).await.unwrap();
        assert_eq!(report.inserted, vec![QuestionId(1)]);

        let retrieved = store.get_question(QuestionId(1)).await.unwrap().unwrap();
        assert!(!retrieved.answered);
    }

    #[tokio::test]
    async fn test_memory_store_idempotent() {
        let store = MemoryStore::new();
        let question = make_question(1, true);

        let r1 = store.apply_update(&[question.clone()], &[]).await.unwrap();
        assert!(r1.is_dirty());

        let r2 = store.apply_update(&[question], &[]).await.unwrap();
        assert!(!r2.is_dirty());
    }

    #[tokio::test]
    async fn test_memory_outbox_keeps_undelivered() {
        let store = MemoryStore::new();
        let ids = store
            .append_events(&[
                DomainEvent::answered(make_question(1, true)),
                DomainEvent::replay(make_question(2, true)),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_events(&ids[..1]).await.unwrap(), 1);
        let drained = store.drain_grouped().await.unwrap();
        assert!(!drained.contains_key(&EventKind::Answered));
        assert_eq!(drained[&EventKind::Replay][0].id, ids[1]);
    }

    #[tokio::test]
    async fn test_memory_forum_first_sighting_is_silent() {
        let store = MemoryStore::new();
        assert!(store
            .update_forum_states(&[ForumState::opened("VURC")])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.update_forum_states(&[ForumState::closed("VURC")]).await.unwrap().len(),
            1
        );
        assert_eq!(store.drain_grouped().await.unwrap()[&EventKind::ForumChange].len(), 1);
    }
}
