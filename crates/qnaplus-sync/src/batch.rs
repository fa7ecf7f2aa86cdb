//! Micro-batching of bursty change notifications.
//!
//! The first push into an empty [`BatchQueue`] arms a timer; pushes that
//! arrive before it fires join the same batch. When it fires the buffer is
//! swapped for an empty one and handed to the flush callback once. Pushes
//! made while a flush is running start the next batch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use qnaplus_sync_core::{classify, RecordChange};
use qnaplus_sync_realtime::{events, ChannelSpec};
use qnaplus_sync_store::Store;
use tracing::{debug, error, warn};

use crate::dispatch::Dispatcher;

/// Flush callback. Items it returns are put back at the front of the buffer
/// and retried after another debounce window.
type FlushFn<T> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Vec<T>> + Send + Sync>;

/// A debouncing buffer with a single flush callback.
pub struct BatchQueue<T> {
    inner: Arc<BatchInner<T>>,
}

struct BatchInner<T> {
    pending: Mutex<Pending<T>>,
    debounce: Duration,
    flush: FlushFn<T>,
}

struct Pending<T> {
    items: Vec<T>,
    /// Bumped every time the buffer is taken. A timer only flushes the
    /// batch it was armed for.
    epoch: u64,
}

impl<T> Clone for BatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> BatchQueue<T> {
    pub fn new<F>(debounce: Duration, flush: F) -> Self
    where
        F: Fn(Vec<T>) -> BoxFuture<'static, Vec<T>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(BatchInner {
                pending: Mutex::new(Pending {
                    items: Vec::new(),
                    epoch: 0,
                }),
                debounce,
                flush: Arc::new(flush),
            }),
        }
    }

    pub fn push(&self, item: T) {
        self.push_all([item]);
    }

    /// Append `items`, arming the flush timer if the buffer was empty.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push_all<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.inner.enqueue(items.into_iter().collect(), false);
    }

    /// Items waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Flush whatever is buffered now. A timer armed for that batch is
    /// disarmed.
    pub async fn flush_now(&self) {
        self.inner.flush_pending(None).await;
    }
}

impl<T: Send + 'static> BatchInner<T> {
    fn lock(&self) -> MutexGuard<'_, Pending<T>> {
        // The buffer is a plain Vec, valid even if a pusher panicked.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(self: &Arc<Self>, mut items: Vec<T>, front: bool) {
        let armed_for = {
            let mut pending = self.lock();
            let was_empty = pending.items.is_empty();
            if front {
                items.append(&mut pending.items);
                pending.items = items;
            } else {
                pending.items.append(&mut items);
            }
            (was_empty && !pending.items.is_empty()).then_some(pending.epoch)
        };
        if let Some(epoch) = armed_for {
            let inner = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(inner.debounce).await;
                inner.flush_pending(Some(epoch)).await;
            });
        }
    }

    /// Take and flush the buffer. With `armed_for`, only if no flush has
    /// taken the buffer since that timer was armed.
    async fn flush_pending(self: &Arc<Self>, armed_for: Option<u64>) {
        let batch = {
            let mut pending = self.lock();
            if armed_for.is_some_and(|epoch| epoch != pending.epoch) {
                return;
            }
            pending.epoch += 1;
            std::mem::take(&mut pending.items)
        };
        if batch.is_empty() {
            return;
        }
        debug!(items = batch.len(), "flushing batch");
        let retry = (self.flush)(batch).await;
        if !retry.is_empty() {
            debug!(items = retry.len(), "requeueing unflushed items");
            self.enqueue(retry, true);
        }
    }
}

/// Batches raw question changes, classifies each batch into domain events,
/// stores them in the outbox and runs a dispatch.
///
/// A batch whose events cannot be stored is put back and retried after the
/// next debounce window.
#[derive(Clone)]
pub struct ChangeQueue {
    queue: BatchQueue<RecordChange>,
}

impl ChangeQueue {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<Dispatcher>, debounce: Duration) -> Self {
        let queue = BatchQueue::new(debounce, move |changes: Vec<RecordChange>| {
            let store = store.clone();
            let dispatcher = dispatcher.clone();
            let fut: BoxFuture<'static, Vec<RecordChange>> = Box::pin(async move {
                let events = classify(&changes);
                if events.is_empty() {
                    debug!(changes = changes.len(), "batch produced no events");
                    return Vec::new();
                }
                if let Err(e) = store.append_events(&events).await {
                    error!(error = %e, events = events.len(), "failed to queue classified events, retrying batch");
                    return changes;
                }
                if let Err(e) = dispatcher.dispatch().await {
                    warn!(error = %e, "dispatch after batch failed, events stay queued");
                }
                Vec::new()
            });
            fut
        });
        Self { queue }
    }

    pub fn push(&self, change: RecordChange) {
        self.queue.push(change);
    }

    pub fn push_all(&self, changes: impl IntoIterator<Item = RecordChange>) {
        self.queue.push_all(changes);
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub async fn flush_now(&self) {
        self.queue.flush_now().await;
    }

    /// Add the `question_update` handler to the `db-changes` channel.
    pub fn attach(&self, spec: ChannelSpec) -> ChannelSpec {
        let changes = self.clone();
        spec.on(events::QUESTION_UPDATE, move |message| {
            match message.decode::<RecordChange>() {
                Ok(change) => changes.push(change),
                Err(e) => warn!(error = %e, "ignoring malformed question update"),
            }
        })
    }
}
