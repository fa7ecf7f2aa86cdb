//! Re-announcing already answered questions.
//!
//! Operators queue question ids for renotification. Each scheduled run
//! publishes the queued questions on the `renotify-queue` topic. A consumer
//! turns them into synthetic unanswered-to-answered changes, feeds them to
//! its [`ChangeQueue`], and acknowledges. The acknowledgement clears
//! exactly the ids that were published; anything queued since stays.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use qnaplus_sync_core::{QuestionId, RecordChange};
use qnaplus_sync_realtime::{
    events, topics, ChannelSpec, Message, RenotifyPayload, SendOptions, SendStatus, Transport,
};
use qnaplus_sync_store::Store;
use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};

use crate::batch::ChangeQueue;
use crate::error::Result;

/// Outcome of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing was queued.
    Empty,
    /// This many questions were broadcast and await acknowledgement.
    Published(usize),
    /// The broadcast did not go out; the queue is untouched.
    NotSent(SendStatus),
}

/// Publishes the renotify queue and clears it on acknowledgement.
#[derive(Clone)]
pub struct RenotifyPublisher {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    awaiting_ack: Arc<Mutex<Vec<QuestionId>>>,
}

impl RenotifyPublisher {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            awaiting_ack: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue stored questions for re-announcement. Returns how many were
    /// newly queued; unknown ids are ignored.
    pub async fn queue(&self, ids: &[QuestionId]) -> Result<usize> {
        let queued = self.store.queue_renotify(ids).await?;
        info!(requested = ids.len(), queued, "queued questions for renotification");
        Ok(queued)
    }

    /// Broadcast every queued question.
    pub async fn publish(&self) -> Result<PublishOutcome> {
        self.publish_inner().instrument(info_span!("renotify")).await
    }

    async fn publish_inner(&self) -> Result<PublishOutcome> {
        let questions = self.store.get_renotify_queue().await?;
        if questions.is_empty() {
            info!("no questions queued for renotification");
            return Ok(PublishOutcome::Empty);
        }

        let ids: Vec<_> = questions.iter().map(|q| q.id).collect();
        let count = ids.len();
        let message = Message::encode(events::RENOTIFY_QUEUE_FLUSH, &RenotifyPayload { questions })?;

        // Armed before sending so an early acknowledgement is not missed.
        *self.awaiting() = ids;
        let status = self
            .transport
            .send(topics::RENOTIFY_QUEUE, message, SendOptions::default())
            .await;

        if status.is_ok() {
            info!(questions = count, "renotify queue broadcast");
            Ok(PublishOutcome::Published(count))
        } else {
            self.awaiting().clear();
            warn!(status = %status, "renotify broadcast not sent, will retry next run");
            Ok(PublishOutcome::NotSent(status))
        }
    }

    /// Clear the ids of the last successful publish.
    pub async fn acknowledge(&self) -> Result<usize> {
        let ids = std::mem::take(&mut *self.awaiting());
        if ids.is_empty() {
            return Ok(0);
        }
        let cleared = self.store.clear_renotify_queue(&ids).await?;
        info!(cleared, "cleared renotify queue after acknowledgement");
        Ok(cleared)
    }

    /// Add the acknowledgement handler to the `renotify-queue` channel.
    pub fn attach(&self, spec: ChannelSpec) -> ChannelSpec {
        let publisher = self.clone();
        spec.on(events::RENOTIFY_QUEUE_FLUSH_ACK, move |_message| {
            let publisher = publisher.clone();
            tokio::spawn(async move {
                if let Err(e) = publisher.acknowledge().await {
                    error!(error = %e, "failed to clear renotify queue");
                }
            });
        })
    }

    fn awaiting(&self) -> MutexGuard<'_, Vec<QuestionId>> {
        self.awaiting_ack.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receives renotify broadcasts and feeds them to the change pipeline.
#[derive(Clone)]
pub struct RenotifyConsumer {
    changes: ChangeQueue,
    transport: Arc<dyn Transport>,
}

impl RenotifyConsumer {
    pub fn new(changes: ChangeQueue, transport: Arc<dyn Transport>) -> Self {
        Self { changes, transport }
    }

    /// Push one broadcast into the change queue and acknowledge it.
    pub async fn handle(&self, payload: RenotifyPayload) {
        let count = payload.questions.len();
        self.changes
            .push_all(payload.questions.into_iter().map(RecordChange::renotify));
        info!(questions = count, "queued renotify changes");

        let ack = Message::new(events::RENOTIFY_QUEUE_FLUSH_ACK, Value::Null);
        let status = self
            .transport
            .send(topics::RENOTIFY_QUEUE, ack, SendOptions::default())
            .await;
        if !status.is_ok() {
            warn!(status = %status, "renotify acknowledgement not sent");
        }
    }

    /// Add the flush handler to the `renotify-queue` channel.
    pub fn attach(&self, spec: ChannelSpec) -> ChannelSpec {
        let consumer = self.clone();
        spec.on(events::RENOTIFY_QUEUE_FLUSH, move |message| {
            let payload = match message.decode::<RenotifyPayload>() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed renotify broadcast");
                    return;
                }
            };
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.handle(payload).await });
        })
    }
}
