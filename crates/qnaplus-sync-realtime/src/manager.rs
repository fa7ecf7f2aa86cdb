//! Subscription manager: keeps named channels alive.
//!
//! Each topic has one [`TopicEntry`] holding its factory, callbacks and
//! current state. All status reports from the transport flow through one
//! event loop into [`Inner::handle_status`], the single transition function.
//!
//! ```text
//! Unregistered ─add─> Created ─start─> Joining ─Joined─> Joined
//!                                         ^                 │
//!                                         │      Closed / TimedOut / ChannelError
//!                                         │                 v
//!                      Backoff <─token expired─ (left, down until re-added)
//! ```
//!
//! At most one channel instance per topic is ever live on the transport:
//! the old instance is always left before a replacement is joined.
//! Stopping leaves every channel and moves all topics to `Closed` for good.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::channel::{ChannelFactory, ChannelSpec, ChannelStatus, StatusUpdate};
use crate::error::ChannelError;
use crate::transport::{StatusSender, Transport};

type TopicCallback = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&str, &ChannelError) + Send + Sync>;

/// Optional lifecycle hooks for one topic.
#[derive(Clone, Default)]
pub struct SubscriptionCallbacks {
    on_subscribe: Option<TopicCallback>,
    on_close: Option<TopicCallback>,
    on_timeout: Option<TopicCallback>,
    on_error: Option<ErrorCallback>,
}

impl SubscriptionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_subscribe(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_subscribe = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn on_timeout(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str, &ChannelError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SubscriptionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionCallbacks")
            .field("on_subscribe", &self.on_subscribe.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Where a topic is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicState {
    /// Registered, not yet subscribed.
    Created,
    Joining,
    Joined,
    Closed,
    TimedOut,
    /// Waiting to recreate after a credential-expiry error.
    Backoff { attempt: u32 },
    /// Down after an unrecoverable error or an exhausted retry budget.
    Failed(ChannelError),
}

struct TopicEntry {
    factory: Arc<dyn ChannelFactory>,
    callbacks: SubscriptionCallbacks,
    /// Spec built at registration, used by the first subscribe.
    pending: Option<ChannelSpec>,
    /// Generation of the current channel instance.
    generation: u64,
    /// Whether that instance is joined or joining on the transport.
    live: bool,
    state: TopicState,
    /// Consecutive credential-expiry recreations.
    attempts: u32,
}

struct Inner {
    transport: Arc<dyn Transport>,
    backoff: BackoffPolicy,
    topics: Mutex<HashMap<String, TopicEntry>>,
    started: AtomicBool,
    /// Set by [`StopHandle::stop`]. A stopped manager joins nothing.
    stopped: AtomicBool,
    next_generation: AtomicU64,
    status_tx: StatusSender,
    status_rx: Mutex<Option<mpsc::UnboundedReceiver<StatusUpdate>>>,
}

/// Deferred callback, run after the topic map lock is released.
enum Notify {
    Topic(TopicCallback, String),
    Error(ErrorCallback, String, ChannelError),
}

impl Notify {
    fn run(self) {
        match self {
            Notify::Topic(f, topic) => f(&topic),
            Notify::Error(f, topic, err) => f(&topic, &err),
        }
    }
}

/// Owns the lifecycle of every realtime channel in the process.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn Transport>, backoff: BackoffPolicy) -> Self {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                transport,
                backoff,
                topics: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                next_generation: AtomicU64::new(1),
                status_tx,
                status_rx: Mutex::new(Some(status_rx)),
            }),
        }
    }

    /// The transport channels are joined on.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    /// Register a channel factory.
    ///
    /// The topic is taken from the first spec the factory builds. A factory
    /// already registered for that topic is replaced and its channel left.
    /// If the manager is started the channel is subscribed immediately.
    pub async fn add<F>(&self, factory: F, callbacks: SubscriptionCallbacks) -> Unregister
    where
        F: ChannelFactory + 'static,
    {
        let spec = factory.create();
        let topic = spec.topic().to_string();
        let started = self.inner.started.load(Ordering::SeqCst);

        let mut topics = self.inner.topics.lock().await;
        if let Some(previous) = topics.remove(&topic) {
            warn!(topic = %topic, "overwriting existing channel factory");
            self.inner.dispose(&topic, &previous).await;
        }

        let mut entry = TopicEntry {
            factory: Arc::new(factory),
            callbacks,
            pending: Some(spec),
            generation: 0,
            live: false,
            state: TopicState::Created,
            attempts: 0,
        };
        if started {
            self.inner.subscribe(&topic, &mut entry).await;
        }
        topics.insert(topic.clone(), entry);

        Unregister {
            inner: Arc::downgrade(&self.inner),
            topic,
        }
    }

    /// Unsubscribe and forget `topic`. Unknown topics are ignored.
    pub async fn remove(&self, topic: &str) {
        self.inner.remove(topic).await;
    }

    /// Subscribe every registered channel and begin handling statuses.
    ///
    /// Only the first call has any effect; later calls log a warning and
    /// return a handle that does nothing.
    pub async fn start(&self) -> StopHandle {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("subscription manager already started, ignoring start");
            return StopHandle::noop();
        }

        let task = self
            .inner
            .status_rx
            .lock()
            .await
            .take()
            .map(|rx| tokio::spawn(run_event_loop(Arc::downgrade(&self.inner), rx)));

        let mut topics = self.inner.topics.lock().await;
        for (topic, entry) in topics.iter_mut() {
            self.inner.subscribe(topic, entry).await;
        }
        info!(channels = topics.len(), "subscription manager started");

        StopHandle {
            inner: Some(Arc::downgrade(&self.inner)),
            task,
        }
    }

    /// Recreate and subscribe `topic` from its factory.
    ///
    /// This is how callers bring a closed, timed-out or failed topic back.
    /// Returns false if the topic is not registered.
    pub async fn resubscribe(&self, topic: &str) -> bool {
        let mut topics = self.inner.topics.lock().await;
        let Some(entry) = topics.get_mut(topic) else {
            return false;
        };
        entry.attempts = 0;
        self.inner.recreate(topic, entry).await;
        true
    }

    /// Current state of `topic`, if registered.
    pub async fn state(&self, topic: &str) -> Option<TopicState> {
        self.inner.topics.lock().await.get(topic).map(|e| e.state.clone())
    }

    /// Registered topic names, sorted.
    pub async fn topics(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.topics.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    /// Join the entry's channel unless it is already live.
    async fn subscribe(&self, topic: &str, entry: &mut TopicEntry) {
        if entry.live {
            debug!(topic = %topic, "channel already joined or joining, skipping subscribe");
            return;
        }
        if self.stopped.load(Ordering::SeqCst) {
            debug!(topic = %topic, "manager stopped, not joining");
            entry.state = TopicState::Closed;
            return;
        }
        let spec = entry.pending.take().unwrap_or_else(|| entry.factory.create());
        if spec.topic() != topic {
            warn!(topic = %topic, built = %spec.topic(), "factory built a spec for another topic");
        }

        entry.generation = self.next_generation();
        entry.live = true;
        entry.state = TopicState::Joining;
        debug!(topic = %topic, generation = entry.generation, "joining channel");

        if let Err(e) = self
            .transport
            .join(spec, entry.generation, self.status_tx.clone())
            .await
        {
            // Join failures take the same path as server-reported errors.
            let update = StatusUpdate {
                topic: topic.to_string(),
                generation: entry.generation,
                status: ChannelStatus::ChannelError(ChannelError::new(e.to_string())),
            };
            if self.status_tx.send(update).is_err() {
                error!(topic = %topic, error = %e, "join failed and the status loop is gone");
                entry.live = false;
                entry.state = TopicState::Failed(ChannelError::new(e.to_string()));
            }
        }
    }

    /// Leave the entry's current channel instance, if live.
    async fn dispose(&self, topic: &str, entry: &TopicEntry) {
        if !entry.live {
            return;
        }
        if let Err(e) = self.transport.leave(topic, entry.generation).await {
            warn!(topic = %topic, error = %e, "failed to leave channel");
        }
    }

    /// Replace the entry's channel with a fresh one from its factory.
    async fn recreate(&self, topic: &str, entry: &mut TopicEntry) {
        self.dispose(topic, entry).await;
        entry.live = false;
        entry.pending = None;
        self.subscribe(topic, entry).await;
    }

    async fn remove(&self, topic: &str) {
        let mut topics = self.topics.lock().await;
        if let Some(entry) = topics.remove(topic) {
            self.dispose(topic, &entry).await;
            debug!(topic = %topic, "channel removed");
        }
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut topics = self.topics.lock().await;
        for (topic, entry) in topics.iter_mut() {
            self.dispose(topic, entry).await;
            entry.live = false;
            entry.state = TopicState::Closed;
        }
        info!("subscription manager stopped");
    }

    /// Apply one status report. Returns the callbacks to run.
    async fn handle_status(self: &Arc<Self>, update: StatusUpdate) -> Option<Notify> {
        let StatusUpdate {
            topic,
            generation,
            status,
        } = update;

        let mut topics = self.topics.lock().await;
        let entry = topics.get_mut(&topic)?;
        if entry.generation != generation || !entry.live {
            debug!(topic = %topic, generation, "ignoring status from disposed channel");
            return None;
        }

        match status {
            ChannelStatus::Joined => {
                info!(topic = %topic, "subscribed");
                entry.state = TopicState::Joined;
                entry.attempts = 0;
                entry
                    .callbacks
                    .on_subscribe
                    .clone()
                    .map(|f| Notify::Topic(f, topic))
            }
            ChannelStatus::Closed => {
                info!(topic = %topic, "channel closed");
                self.dispose(&topic, entry).await;
                entry.live = false;
                entry.state = TopicState::Closed;
                entry.callbacks.on_close.clone().map(|f| Notify::Topic(f, topic))
            }
            ChannelStatus::TimedOut => {
                info!(topic = %topic, "channel timed out");
                self.dispose(&topic, entry).await;
                entry.live = false;
                entry.state = TopicState::TimedOut;
                entry.callbacks.on_timeout.clone().map(|f| Notify::Topic(f, topic))
            }
            ChannelStatus::ChannelError(err) if err.is_token_expired() => {
                self.dispose(&topic, entry).await;
                entry.live = false;
                entry.attempts += 1;
                let attempt = entry.attempts;

                if !self.backoff.allows(attempt) {
                    error!(topic = %topic, attempts = attempt - 1, error = %err, "token expired and resubscribe budget exhausted");
                    entry.state = TopicState::Failed(err.clone());
                    return entry
                        .callbacks
                        .on_error
                        .clone()
                        .map(|f| Notify::Error(f, topic, err));
                }

                let delay = self.backoff.delay_for_attempt(attempt);
                warn!(topic = %topic, attempt, delay_ms = delay.as_millis() as u64, "token expired, resubscribing");
                entry.state = TopicState::Backoff { attempt };

                let weak = Arc::downgrade(self);
                let expected = entry.generation;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.retry(&topic, expected).await;
                    }
                });
                None
            }
            ChannelStatus::ChannelError(err) => {
                error!(topic = %topic, error = %err, "channel error");
                self.dispose(&topic, entry).await;
                entry.live = false;
                entry.state = TopicState::Failed(err.clone());
                entry
                    .callbacks
                    .on_error
                    .clone()
                    .map(|f| Notify::Error(f, topic, err))
            }
        }
    }

    /// Recreate after a backoff, unless the topic was removed, replaced or
    /// resubscribed in the meantime.
    async fn retry(&self, topic: &str, expected_generation: u64) {
        let mut topics = self.topics.lock().await;
        let Some(entry) = topics.get_mut(topic) else {
            return;
        };
        if entry.generation != expected_generation || entry.live {
            return;
        }
        if !matches!(entry.state, TopicState::Backoff { .. }) {
            return;
        }
        self.recreate(topic, entry).await;
    }
}

async fn run_event_loop(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<StatusUpdate>) {
    while let Some(update) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Some(notify) = inner.handle_status(update).await {
            notify.run();
        }
    }
}

/// Returned by [`SubscriptionManager::add`]; unregisters the topic.
#[derive(Debug)]
pub struct Unregister {
    inner: Weak<Inner>,
    topic: String,
}

impl Unregister {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn unregister(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove(&self.topic).await;
        }
    }
}

/// Returned by [`SubscriptionManager::start`]; leaves every live channel.
#[derive(Debug)]
pub struct StopHandle {
    inner: Option<Weak<Inner>>,
    task: Option<JoinHandle<()>>,
}

impl StopHandle {
    fn noop() -> Self {
        Self {
            inner: None,
            task: None,
        }
    }

    pub async fn stop(self) {
        if let Some(inner) = self.inner.and_then(|w| w.upgrade()) {
            inner.stop().await;
        }
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn manager(transport: &MemoryTransport, backoff: BackoffPolicy) -> SubscriptionManager {
        SubscriptionManager::new(Arc::new(transport.clone()), backoff)
    }

    fn expired() -> ChannelStatus {
        ChannelStatus::ChannelError(ChannelError::new("\"Token has expired 1 seconds ago\""))
    }

    /// Let the event loop and any spawned retries run.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&str) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &str| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_add_before_start_waits() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, BackoffPolicy::default());
        let (subscribed, on_subscribe) = counter();

        manager
            .add(|| ChannelSpec::new("db-changes"), SubscriptionCallbacks::new().on_subscribe(on_subscribe))
            .await;
        assert_eq!(transport.live_channels("db-changes").await, 0);
        assert_eq!(manager.state("db-changes").await, Some(TopicState::Created));

        let _stop = manager.start().await;
        settle().await;
        assert_eq!(transport.live_channels("db-changes").await, 1);
        assert_eq!(manager.state("db-changes").await, Some(TopicState::Joined));
        assert_eq!(subscribed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_add_after_start_subscribes_immediately() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, BackoffPolicy::default());
        let _stop = manager.start().await;

        manager
            .add(|| ChannelSpec::new("precheck"), SubscriptionCallbacks::new())
            .await;
        settle().await;
        assert_eq!(transport.live_channels("precheck").await, 1);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_channel() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, BackoffPolicy::default());
        let hits = Arc::new(AtomicUsize::new(0));

        manager
            .add(|| ChannelSpec::new("renotify-queue"), SubscriptionCallbacks::new())
            .await;
        let h = hits.clone();
        manager
            .add(
                move || {
                    let h = h.clone();
                    ChannelSpec::new("renotify-queue").on("ping", move |_| {
                        h.fetch_add(1, Ordering::SeqCst);
                    })
                },
                SubscriptionCallbacks::new(),
            )
            .await;

        let _stop = manager.start().await;
        settle().await;
        assert_eq!(transport.live_channels("renotify-queue").await, 1);

        // Overwriting while started leaves the old channel first.
        manager
            .add(|| ChannelSpec::new("renotify-queue"), SubscriptionCallbacks::new())
            .await;
        settle().await;
        assert_eq!(transport.live_channels("renotify-queue").await, 1);
        assert_eq!(manager.topics().await, vec!["renotify-queue".to_string()]);
    }

    #[tokio::test]
    async fn test_second_factory_wins_before_start() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, BackoffPolicy::default());
        let hits = Arc::new(AtomicUsize::new(0));

        manager
            .add(|| ChannelSpec::new("renotify-queue"), SubscriptionCallbacks::new())
            .await;
        let h = hits.clone();
        manager
            .add(
                move || {
                    let h = h.clone();
                    ChannelSpec::new("renotify-queue").on("ping", move |_| {
                        h.fetch_add(1, Ordering::SeqCst);
                    })
                },
                SubscriptionCallbacks::new(),
            )
            .await;
        let _stop = manager.start().await;
        settle().await;

        transport
            .deliver("renotify-queue", crate::messages::Message::new("ping", serde_json::Value::Null))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, BackoffPolicy::default());
        manager
            .add(|| ChannelSpec::new("db-changes"), SubscriptionCallbacks::new())
            .await;

        let stop = manager.start().await;
        let second = manager.start().await;
        settle().await;
        assert_eq!(transport.join_count("db-changes").await, 1);

        second.stop().await;
        assert_eq!(transport.live_channels("db-changes").await, 1);

        stop.stop().await;
        assert_eq!(transport.live_channels("db-changes").await, 0);
    }

    #[tokio::test]
    async fn test_stop_closes_topics_and_joins_nothing_after() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, BackoffPolicy::default());
        manager
            .add(|| ChannelSpec::new("db-changes"), SubscriptionCallbacks::new())
            .await;
        let stop = manager.start().await;
        settle().await;
        assert_eq!(manager.state("db-changes").await, Some(TopicState::Joined));

        stop.stop().await;
        assert_eq!(manager.state("db-changes").await, Some(TopicState::Closed));

        manager
            .add(|| ChannelSpec::new("precheck"), SubscriptionCallbacks::new())
            .await;
        assert!(manager.resubscribe("db-changes").await);
        settle().await;

        assert_eq!(transport.join_count("db-changes").await, 1);
        assert_eq!(transport.join_count("precheck").await, 0);
        assert_eq!(manager.state("db-changes").await, Some(TopicState::Closed));
        assert_eq!(manager.state("precheck").await, Some(TopicState::Closed));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, BackoffPolicy::default());
        let unregister = manager
            .add(|| ChannelSpec::new("program-states"), SubscriptionCallbacks::new())
            .await;
        let _stop = manager.start().await;
        settle().await;

        unregister.unregister().await;
        manager.remove("program-states").await;
        manager.remove("never-added").await;
        assert_eq!(transport.live_channels("program-states").await, 0);
        assert!(manager.state("program-states").await.is_none());
    }

    #[tokio::test]
    async fn test_close_and_timeout_do_not_recreate() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, BackoffPolicy::default());
        let (closed, on_close) = counter();
        let (timed_out, on_timeout) = counter();

        manager
            .add(
                || ChannelSpec::new("db-changes"),
                SubscriptionCallbacks::new().on_close(on_close),
            )
            .await;
        transport.script_joins("precheck", [ChannelStatus::TimedOut]).await;
        manager
            .add(
                || ChannelSpec::new("precheck"),
                SubscriptionCallbacks::new().on_timeout(on_timeout),
            )
            .await;
        let _stop = manager.start().await;
        settle().await;

        transport.inject_status("db-changes", ChannelStatus::Closed).await;
        settle().await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(timed_out.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state("db-changes").await, Some(TopicState::Closed));
        assert_eq!(manager.state("precheck").await, Some(TopicState::TimedOut));
        assert_eq!(transport.join_count("db-changes").await, 1);
        assert_eq!(transport.join_count("precheck").await, 1);
        assert_eq!(transport.live_channels("db-changes").await, 0);

        // Callers can bring a topic back explicitly.
        assert!(manager.resubscribe("db-changes").await);
        settle().await;
        assert_eq!(manager.state("db-changes").await, Some(TopicState::Joined));
    }

    #[tokio::test]
    async fn test_unclassified_error_leaves_topic_down() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, BackoffPolicy::default());
        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();

        transport
            .script_joins(
                "db-changes",
                [ChannelStatus::ChannelError(ChannelError::new("permission denied"))],
            )
            .await;
        manager
            .add(
                || ChannelSpec::new("db-changes"),
                SubscriptionCallbacks::new().on_error(move |_, _| {
                    e.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;
        let _stop = manager.start().await;
        settle().await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(matches!(manager.state("db-changes").await, Some(TopicState::Failed(_))));
        assert_eq!(transport.join_count("db-changes").await, 1);
        assert_eq!(transport.live_channels("db-changes").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_expiry_resubscribes_after_backoff() {
        let transport = MemoryTransport::new();
        let policy = BackoffPolicy::new(3, Duration::from_millis(500), Duration::from_secs(30), 2.0, 0.0);
        let manager = manager(&transport, policy);
        let (subscribed, on_subscribe) = counter();

        transport.script_joins("db-changes", [expired(), expired()]).await;
        manager
            .add(|| ChannelSpec::new("db-changes"), SubscriptionCallbacks::new().on_subscribe(on_subscribe))
            .await;
        let _stop = manager.start().await;
        settle().await;

        assert_eq!(manager.state("db-changes").await, Some(TopicState::Backoff { attempt: 1 }));
        assert_eq!(transport.live_channels("db-changes").await, 0);

        tokio::time::sleep(Duration::from_millis(501)).await;
        settle().await;
        assert_eq!(transport.join_count("db-changes").await, 2);
        assert_eq!(manager.state("db-changes").await, Some(TopicState::Backoff { attempt: 2 }));

        tokio::time::sleep(Duration::from_millis(1001)).await;
        settle().await;
        assert_eq!(transport.join_count("db-changes").await, 3);
        assert_eq!(manager.state("db-changes").await, Some(TopicState::Joined));
        assert_eq!(subscribed.load(Ordering::SeqCst), 1);
        assert_eq!(transport.live_channels("db-changes").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_expiry_budget_exhausted() {
        let transport = MemoryTransport::new();
        let policy = BackoffPolicy::new(2, Duration::from_millis(100), Duration::from_secs(1), 2.0, 0.0);
        let manager = manager(&transport, policy);
        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();

        transport
            .script_joins("db-changes", [expired(), expired(), expired(), expired()])
            .await;
        manager
            .add(
                || ChannelSpec::new("db-changes"),
                SubscriptionCallbacks::new().on_error(move |_, err| {
                    assert!(err.is_token_expired());
                    e.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;
        let _stop = manager.start().await;

        for _ in 0..5 {
            settle().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        settle().await;

        // One initial join plus two retries, then the circuit opens.
        assert_eq!(transport.join_count("db-changes").await, 3);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(matches!(manager.state("db-changes").await, Some(TopicState::Failed(_))));
        assert_eq!(transport.live_channels("db-changes").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_skipped_after_remove() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, BackoffPolicy::default());
        transport.script_joins("db-changes", [expired()]).await;
        manager
            .add(|| ChannelSpec::new("db-changes"), SubscriptionCallbacks::new())
            .await;
        let _stop = manager.start().await;
        settle().await;

        manager.remove("db-changes").await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(transport.join_count("db-changes").await, 1);
    }
}
