//! The assembled pipeline.
//!
//! [`SyncService`] wires the reconciler, dispatcher, change queue and
//! realtime handlers around one [`SyncContext`], and runs the scheduled job
//! under a single-flight guard.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use qnaplus_sync_core::{EventKind, ForumState, ForumTransition, Frontier, QuestionId};
use qnaplus_sync_realtime::{topics, ChannelSpec, StopHandle, SubscriptionCallbacks};
use tracing::{error, info, warn};

use crate::batch::ChangeQueue;
use crate::context::SyncContext;
use crate::dispatch::{pending_counts, DispatchReport, Dispatcher};
use crate::error::{Result, SyncError};
use crate::export::export_questions;
use crate::fetch::Fetcher;
use crate::forum::{ForumStateListener, ForumStateUpdater};
use crate::notify::{Exporter, Notifier};
use crate::precheck::{PrecheckProbe, PrecheckResponder};
use crate::reconcile::{ReconcileOptions, Reconciler, UpdateResult};
use crate::renotify::{PublishOutcome, RenotifyConsumer, RenotifyPublisher};
use crate::replay::{queue_replay, queue_replay_since, ReplayReport};
use crate::schedule::{ProtectedTask, Scheduler, TriggerOutcome};

/// External systems the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub notifier: Arc<dyn Notifier>,
    /// Receives `questions.json` after runs that changed storage.
    pub exporter: Option<Arc<dyn Exporter>>,
    /// Answers precheck requests; without one the topic is not served.
    pub probe: Option<Arc<dyn PrecheckProbe>>,
}

impl Collaborators {
    pub fn new(fetcher: Arc<dyn Fetcher>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            fetcher,
            notifier,
            exporter: None,
            probe: None,
        }
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn PrecheckProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

/// What one scheduled run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// `None` if reading the renotify queue failed.
    pub renotify: Option<PublishOutcome>,
    pub update: UpdateResult,
    pub dispatch: DispatchReport,
    /// Questions exported, if an export ran.
    pub exported: Option<usize>,
}

struct ServiceInner {
    ctx: SyncContext,
    reconciler: Reconciler,
    dispatcher: Arc<Dispatcher>,
    changes: ChangeQueue,
    publisher: RenotifyPublisher,
    consumer: RenotifyConsumer,
    forum: ForumStateUpdater,
    listener: ForumStateListener,
    precheck: Option<PrecheckResponder>,
    exporter: Option<Arc<dyn Exporter>>,
}

/// The sync pipeline for one process.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<ServiceInner>,
    task: ProtectedTask,
}

/// A started service. Dropping it leaves the scheduler running; call
/// [`Running::shutdown`] to stop.
pub struct Running {
    scheduler: Scheduler,
    realtime: StopHandle,
}

impl Running {
    pub async fn shutdown(self) -> Result<()> {
        self.realtime.stop().await;
        self.scheduler.shutdown().await?;
        info!("sync service stopped");
        Ok(())
    }
}

impl SyncService {
    pub fn new(ctx: SyncContext, collaborators: Collaborators) -> Self {
        let store = ctx.store.clone();
        let transport = ctx.transport();
        let config = ctx.config.clone();

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            collaborators.notifier,
            config.notify_chunk_size,
        ));
        let changes = ChangeQueue::new(store.clone(), dispatcher.clone(), config.debounce);
        let inner = Arc::new(ServiceInner {
            reconciler: Reconciler::new(
                store.clone(),
                collaborators.fetcher,
                ReconcileOptions::from(config.as_ref()),
            ),
            publisher: RenotifyPublisher::new(store.clone(), transport.clone()),
            consumer: RenotifyConsumer::new(changes.clone(), transport.clone()),
            forum: ForumStateUpdater::new(store, transport.clone()),
            listener: ForumStateListener::new(dispatcher.clone()),
            precheck: collaborators
                .probe
                .map(|probe| PrecheckResponder::new(probe, transport, config.precheck_timeout)),
            exporter: collaborators.exporter,
            dispatcher,
            changes,
            ctx,
        });

        let job_inner = inner.clone();
        let task = ProtectedTask::new("database_update", move || {
            let inner = job_inner.clone();
            Box::pin(async move {
                inner.run_job().await.context("database update")?;
                Ok::<_, anyhow::Error>(())
            })
        });

        Self { inner, task }
    }

    pub fn context(&self) -> &SyncContext {
        &self.inner.ctx
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.inner.dispatcher.clone()
    }

    pub fn changes(&self) -> &ChangeQueue {
        &self.inner.changes
    }

    /// Check the store is reachable and has been bootstrapped.
    pub async fn bootstrap(&self) -> Result<Frontier> {
        let store = &self.inner.ctx.store;
        store
            .ping()
            .await
            .map_err(|e| SyncError::Bootstrap(format!("store unreachable: {e}")))?;
        let frontier = store
            .get_frontier()
            .await
            .map_err(|e| SyncError::Bootstrap(format!("cannot read frontier: {e}")))?
            .ok_or_else(|| SyncError::Bootstrap("frontier row is missing".into()))?;
        info!(
            season = %frontier.current_season,
            oldest_unanswered_id = %frontier.oldest_unanswered_id,
            "store bootstrapped"
        );
        Ok(frontier)
    }

    /// Run the scheduled job now, unless a run is already in progress.
    pub async fn trigger(&self) -> TriggerOutcome {
        self.task.trigger().await
    }

    /// The single-flight task wrapping the scheduled job.
    pub fn task(&self) -> ProtectedTask {
        self.task.clone()
    }

    /// Run the job body directly, bypassing the single-flight guard.
    pub async fn run_once(&self) -> Result<JobReport> {
        self.inner.run_job().await
    }

    /// Register every realtime channel this process serves.
    pub async fn register_channels(&self) {
        let realtime = &self.inner.ctx.realtime;

        let changes = self.inner.changes.clone();
        realtime
            .add(
                move || changes.attach(ChannelSpec::new(topics::DB_CHANGES)),
                callbacks(topics::DB_CHANGES),
            )
            .await;

        // One channel carries both halves of the renotify handshake.
        let publisher = self.inner.publisher.clone();
        let consumer = self.inner.consumer.clone();
        realtime
            .add(
                move || publisher.attach(consumer.attach(ChannelSpec::new(topics::RENOTIFY_QUEUE))),
                callbacks(topics::RENOTIFY_QUEUE),
            )
            .await;

        let listener = self.inner.listener.clone();
        realtime
            .add(
                move || listener.attach(ChannelSpec::new(topics::PROGRAM_STATES)),
                callbacks(topics::PROGRAM_STATES),
            )
            .await;

        if let Some(responder) = self.inner.precheck.clone() {
            realtime
                .add(
                    move || responder.attach(ChannelSpec::new(topics::PRECHECK).with_ack()),
                    callbacks(topics::PRECHECK),
                )
                .await;
        }
    }

    /// Bootstrap, subscribe every channel and start the cron schedule.
    pub async fn start(&self) -> Result<Running> {
        self.bootstrap().await?;
        self.register_channels().await;
        let realtime = self.inner.ctx.realtime.start().await;

        let scheduler = Scheduler::new().await?;
        scheduler
            .add(&self.inner.ctx.config.schedule, self.task.clone())
            .await?;
        scheduler.start().await?;
        info!(schedule = %self.inner.ctx.config.schedule, "sync service started");

        Ok(Running {
            scheduler,
            realtime,
        })
    }

    /// Queue stored questions for re-announcement on the next run.
    pub async fn queue_renotify(&self, ids: &[QuestionId]) -> Result<usize> {
        self.inner.publisher.queue(ids).await
    }

    pub async fn replay(&self, ids: &[QuestionId]) -> Result<ReplayReport> {
        queue_replay(self.inner.ctx.store.as_ref(), ids).await
    }

    pub async fn replay_since(&self, asked_after_ms: i64) -> Result<ReplayReport> {
        queue_replay_since(self.inner.ctx.store.as_ref(), asked_after_ms).await
    }

    /// Persist probed forum states and dispatch any resulting events.
    pub async fn apply_forum_states(&self, states: &[ForumState]) -> Result<Vec<ForumTransition>> {
        self.inner.forum.apply(states).await
    }

    /// Pending outbox events per kind.
    pub async fn pending(&self) -> Result<BTreeMap<EventKind, usize>> {
        pending_counts(self.inner.ctx.store.as_ref()).await
    }
}

impl ServiceInner {
    /// Renotify publish, reconciliation, dispatch, then export if anything
    /// changed.
    async fn run_job(&self) -> Result<JobReport> {
        let renotify = match self.publisher.publish().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "unable to process renotify queue, skipping");
                None
            }
        };

        let update = self.reconciler.run().await?;
        let dispatch = self.dispatcher.dispatch().await?;

        let exported = match (&self.exporter, update.storage_dirty) {
            (Some(exporter), true) => {
                Some(export_questions(self.ctx.store.as_ref(), exporter.as_ref()).await?)
            }
            _ => None,
        };

        Ok(JobReport {
            renotify,
            update,
            dispatch,
            exported,
        })
    }
}

fn callbacks(topic: &'static str) -> SubscriptionCallbacks {
    SubscriptionCallbacks::new()
        .on_subscribe(move |_| info!(topic, "listening"))
        .on_close(move |_| warn!(topic, "channel closed"))
        .on_timeout(move |_| warn!(topic, "channel timed out"))
        .on_error(move |_, err| error!(topic, error = %err, "channel failed"))
}
