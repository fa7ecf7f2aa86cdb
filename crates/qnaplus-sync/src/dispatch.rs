//! Outbox dispatch.
//!
//! A dispatch snapshots the outbox, groups each kind's events by program,
//! hands them to the notifier in fixed-size chunks, and deletes only the
//! events whose chunk was delivered. Everything else stays for the next
//! dispatch. Two dispatches may overlap; the worst case is a duplicate
//! delivery, never a lost one.

use std::collections::BTreeMap;
use std::sync::Arc;

use qnaplus_sync_core::{DomainEvent, EventId, EventKind};
use qnaplus_sync_store::{OutboxEntry, Store};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::Result;
use crate::notify::Notifier;

/// What one dispatch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Events handed to the notifier and acknowledged.
    pub delivered: usize,
    /// Events whose chunk failed; they remain queued.
    pub failed: usize,
    /// Outbox rows removed.
    pub deleted: usize,
}

/// Drains the outbox into a [`Notifier`].
pub struct Dispatcher {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    chunk_size: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, chunk_size: usize) -> Self {
        Self {
            store,
            notifier,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn dispatch(&self) -> Result<DispatchReport> {
        self.dispatch_inner().instrument(info_span!("dispatch")).await
    }

    async fn dispatch_inner(&self) -> Result<DispatchReport> {
        let pending = self.store.drain_grouped().await?;
        let mut report = DispatchReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        let mut delivered: Vec<EventId> = Vec::new();
        for (kind, entries) in pending {
            for (group_key, group) in group_by_key(entries) {
                for chunk in group.chunks(self.chunk_size) {
                    let events: Vec<DomainEvent> = chunk.iter().map(|e| e.event.clone()).collect();
                    match self.notifier.notify(kind, &group_key, &events).await {
                        Ok(()) => {
                            debug!(topic = %kind, group = %group_key, chunk_size = chunk.len(), "chunk delivered");
                            report.delivered += chunk.len();
                            delivered.extend(chunk.iter().map(|e| e.id.clone()));
                        }
                        Err(e) => {
                            warn!(
                                topic = %kind,
                                group = %group_key,
                                chunk_size = chunk.len(),
                                error = %e,
                                "chunk delivery failed, keeping events queued"
                            );
                            report.failed += chunk.len();
                        }
                    }
                }
            }
        }

        if !delivered.is_empty() {
            report.deleted = self.store.delete_events(&delivered).await?;
        }
        info!(
            delivered = report.delivered,
            failed = report.failed,
            deleted = report.deleted,
            "dispatch complete"
        );
        Ok(report)
    }
}

/// Group one kind's entries by recipient, keeping append order within each
/// group.
fn group_by_key(entries: Vec<OutboxEntry>) -> BTreeMap<String, Vec<OutboxEntry>> {
    let mut groups: BTreeMap<String, Vec<OutboxEntry>> = BTreeMap::new();
    for entry in entries {
        groups
            .entry(entry.event.group_key().to_string())
            .or_default()
            .push(entry);
    }
    groups
}

/// Count pending events per kind, for status reporting.
pub async fn pending_counts(store: &dyn Store) -> Result<BTreeMap<EventKind, usize>> {
    Ok(store
        .drain_grouped()
        .await?
        .into_iter()
        .map(|(kind, entries)| (kind, entries.len()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnaplus_sync_core::{Question, QuestionId};

    fn entry(id: &str, program: &str) -> OutboxEntry {
        OutboxEntry {
            id: EventId::new(id),
            event: DomainEvent::answered(Question {
                id: QuestionId(1),
                url: String::new(),
                program: program.into(),
                season: "2024-2025".into(),
                author: String::new(),
                title: String::new(),
                question: String::new(),
                question_raw: String::new(),
                answer: Some("a".into()),
                answer_raw: None,
                asked_timestamp: String::new(),
                asked_timestamp_ms: 0,
                answered_timestamp: None,
                answered_timestamp_ms: None,
                answered: true,
                tags: vec![],
            }),
        }
    }

    #[test]
    fn test_group_by_key_keeps_order() {
        let groups = group_by_key(vec![
            entry("a", "V5RC"),
            entry("b", "VURC"),
            entry("c", "V5RC"),
        ]);
        let v5rc: Vec<_> = groups["V5RC"].iter().map(|e| e.id.as_str()).collect();
        assert_eq!(v5rc, vec!["a", "c"]);
        assert_eq!(groups["VURC"].len(), 1);
    }
}
