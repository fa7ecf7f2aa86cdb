//! Outbox delivery, micro-batching, replays and export.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, settle, Harness};
use qnaplus_sync::core::{DomainEvent, EventKind, QuestionId, RecordChange};
use qnaplus_sync::store::{MemoryStore, Store};
use qnaplus_sync::{export_questions, ChangeQueue, Dispatcher, SyncError, EXPORT_FILE_NAME};
use qnaplus_sync_testkit::{
    question, FaultyStore, RecordingExporter, RecordingNotifier, ScriptedFetcher, StoreOp,
};

fn answered(id: u64, program: &str) -> DomainEvent {
    DomainEvent::answered(question(id).program(program).answered("Yes.").build())
}

#[tokio::test]
async fn test_dispatch_groups_by_kind_and_program() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    store
        .append_events(&[
            answered(1, "V5RC"),
            answered(2, "VIQRC"),
            answered(3, "V5RC"),
            DomainEvent::replay(question(4).answered("Again.").build()),
        ])
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(store.clone(), Arc::new(notifier.clone()), 10);
    let report = dispatcher.dispatch().await.unwrap();

    assert_eq!(report.delivered, 4);
    assert_eq!(report.deleted, 4);
    let calls: Vec<_> = notifier
        .deliveries()
        .into_iter()
        .map(|d| (d.kind, d.group_key, d.events.len()))
        .collect();
    assert_eq!(
        calls,
        vec![
            (EventKind::Answered, "V5RC".to_string(), 2),
            (EventKind::Answered, "VIQRC".to_string(), 1),
            (EventKind::Replay, "V5RC".to_string(), 1),
        ]
    );
    assert_eq!(
        notifier.delivered_ids(EventKind::Answered),
        vec![QuestionId(1), QuestionId(3), QuestionId(2)]
    );
    assert!(store.drain_grouped().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dispatch_chunks_large_groups() {
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let events: Vec<_> = (1..=25).map(|i| answered(i, "V5RC")).collect();
    store.append_events(&events).await.unwrap();

    let dispatcher = Dispatcher::new(store.clone(), Arc::new(notifier.clone()), 10);
    dispatcher.dispatch().await.unwrap();

    let sizes: Vec<_> = notifier.deliveries().iter().map(|d| d.events.len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
}

#[tokio::test]
async fn test_failed_chunks_stay_queued_until_delivered() {
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    store
        .append_events(&[answered(1, "V5RC"), answered(2, "VIQRC")])
        .await
        .unwrap();
    let dispatcher = Dispatcher::new(store.clone(), Arc::new(notifier.clone()), 10);

    notifier.fail_group("VIQRC");
    let report = dispatcher.dispatch().await.unwrap();
    assert_eq!((report.delivered, report.failed, report.deleted), (1, 1, 1));

    let pending = store.drain_grouped().await.unwrap();
    assert_eq!(pending[&EventKind::Answered].len(), 1);
    assert_eq!(pending[&EventKind::Answered][0].event.group_key(), "VIQRC");

    notifier.recover_group("VIQRC");
    let report = dispatcher.dispatch().await.unwrap();
    assert_eq!((report.delivered, report.failed), (1, 0));
    assert!(store.drain_grouped().await.unwrap().is_empty());
    assert_eq!(
        notifier.delivered_ids(EventKind::Answered),
        vec![QuestionId(1), QuestionId(2)]
    );
}

#[tokio::test]
async fn test_empty_outbox_makes_no_calls() {
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let report = Dispatcher::new(store, Arc::new(notifier.clone()), 10)
        .dispatch()
        .await
        .unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(notifier.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_change_queue_classifies_and_dispatches_one_batch() {
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(notifier.clone()), 10));
    let changes = ChangeQueue::new(store.clone(), dispatcher, Duration::from_millis(1000));

    let open = question(1).build();
    let edited_before = question(2).answered("It is legal.").build();
    let edited_after = question(2).answered("It is not legal.").build();
    changes.push(RecordChange::new(open.clone(), question(1).answered("Yes.").build()));
    settle(400).await;
    changes.push(RecordChange::new(edited_before, edited_after));
    changes.push(RecordChange::new(open.clone(), open));
    assert_eq!(changes.pending(), 3);
    assert_eq!(notifier.attempts(), 0);

    settle(700).await;

    assert_eq!(changes.pending(), 0);
    let kinds: Vec<_> = notifier.deliveries().iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![EventKind::Answered, EventKind::AnswerEdited]);
    assert!(store.drain_grouped().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_change_queue_keeps_events_when_delivery_fails() {
    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    notifier.fail_next(1);
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(notifier.clone()), 10));
    let changes = ChangeQueue::new(store.clone(), dispatcher.clone(), Duration::from_millis(1000));

    changes.push(RecordChange::new(
        question(5).build(),
        question(5).answered("Yes.").build(),
    ));
    settle(1500).await;

    assert_eq!(notifier.attempts(), 1);
    assert_eq!(store.drain_grouped().await.unwrap()[&EventKind::Answered].len(), 1);

    dispatcher.dispatch().await.unwrap();
    assert_eq!(notifier.delivered_ids(EventKind::Answered), vec![QuestionId(5)]);
}

#[tokio::test(start_paused = true)]
async fn test_change_queue_retries_batch_when_outbox_write_fails() {
    let store = FaultyStore::new(Arc::new(MemoryStore::new()));
    store.fail_once(StoreOp::AppendEvents);
    let store: Arc<dyn Store> = Arc::new(store);
    let notifier = RecordingNotifier::new();
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(notifier.clone()), 10));
    let changes = ChangeQueue::new(store.clone(), dispatcher, Duration::from_millis(1000));

    changes.push(RecordChange::new(
        question(5).build(),
        question(5).answered("Yes.").build(),
    ));
    settle(1_100).await;

    // The write failed: nothing was delivered and the change is back in line.
    assert_eq!(notifier.attempts(), 0);
    assert_eq!(changes.pending(), 1);

    settle(1_000).await;
    assert_eq!(changes.pending(), 0);
    assert_eq!(notifier.delivered_ids(EventKind::Answered), vec![QuestionId(5)]);
    assert!(store.drain_grouped().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_replay_queues_known_questions() {
    let harness = Harness::new(1, &[question(1).answered("Yes.").build()]).await;

    let report = harness
        .service
        .replay(&[QuestionId(1), QuestionId(404)])
        .await
        .unwrap();

    assert_eq!(report.queued, 1);
    assert_eq!(report.unknown, vec![QuestionId(404)]);
    assert_eq!(harness.service.pending().await.unwrap()[&EventKind::Replay], 1);

    // Replays leave the stored question alone.
    let stored = harness.store.get_question(QuestionId(1)).await.unwrap().unwrap();
    assert!(stored.answered);
}

#[tokio::test]
async fn test_replay_since_selects_answered_by_asked_time() {
    let harness = Harness::new(
        1,
        &[
            question(1).asked_at(1_000).answered("Old.").build(),
            question(2).asked_at(5_000).answered("New.").build(),
            question(3).asked_at(6_000).build(),
        ],
    )
    .await;

    let report = harness.service.replay_since(2_000).await.unwrap();
    assert_eq!(report.queued, 1);

    harness.service.dispatcher().dispatch().await.unwrap();
    assert_eq!(harness.notifier.delivered_ids(EventKind::Replay), vec![QuestionId(2)]);
}

#[tokio::test]
async fn test_job_exports_only_when_storage_changed() {
    let harness = Harness::new(1, &[]).await;
    harness.fetcher.set_all([question(1).build(), question(2).answered("Yes.").build()]);

    let report = harness.service.run_once().await.unwrap();
    assert!(report.update.storage_dirty);
    assert_eq!(report.exported, Some(2));
    assert_eq!(harness.exporter.last_name().as_deref(), Some(EXPORT_FILE_NAME));
    assert_eq!(harness.exporter.last_questions().map(|q| q.len()), Some(2));

    let report = harness.service.run_once().await.unwrap();
    assert!(!report.update.storage_dirty);
    assert_eq!(report.exported, None);
    assert_eq!(harness.exporter.exports(), 1);
}

#[tokio::test]
async fn test_job_dispatches_what_reconciliation_queued() {
    let harness = Harness::new(1, &[question(1).build()]).await;
    harness.fetcher.set(question(1).answered("Legal.").build());

    let report = harness.service.run_once().await.unwrap();

    assert_eq!(report.update.answered, 1);
    assert_eq!(report.dispatch.delivered, 1);
    assert_eq!(harness.notifier.delivered_ids(EventKind::Answered), vec![QuestionId(1)]);
    assert!(harness.service.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_export_failure_is_reported() {
    let store = Arc::new(MemoryStore::new());
    store.apply_update(&[question(1).build()], &[]).await.unwrap();
    let exporter = RecordingExporter::new();
    exporter.set_failing(true);

    let err = export_questions(store.as_ref(), &exporter).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::Collaborator {
            collaborator: "exporter",
            ..
        }
    ));
}

#[tokio::test]
async fn test_bootstrap_requires_frontier() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let ctx = qnaplus_sync::SyncContext::new(
        store,
        Arc::new(qnaplus_sync::realtime::MemoryTransport::new()),
        qnaplus_sync::SyncConfig::default(),
    );
    let service = qnaplus_sync::SyncService::new(
        ctx,
        qnaplus_sync::Collaborators::new(
            Arc::new(ScriptedFetcher::new()),
            Arc::new(RecordingNotifier::new()),
        ),
    );

    assert!(matches!(service.bootstrap().await, Err(SyncError::Bootstrap(_))));
    assert!(matches!(service.start().await, Err(SyncError::Bootstrap(_))));
}
