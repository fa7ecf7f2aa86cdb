//! Shared setup for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use qnaplus_sync::core::Question;
use qnaplus_sync::realtime::MemoryTransport;
use qnaplus_sync::store::{MemoryStore, Store};
use qnaplus_sync::{
    Collaborators, ReconcileOptions, Reconciler, SyncConfig, SyncContext, SyncService,
};
use qnaplus_sync_testkit::{
    seeded_store, RecordingExporter, RecordingNotifier, ScriptedFetcher, StaticProbe,
};
use tracing_subscriber::EnvFilter;

/// Route pipeline logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Options without waits between failure batches.
pub fn fast_options() -> ReconcileOptions {
    ReconcileOptions {
        failure_batch_size: 10,
        failure_batch_interval: Duration::ZERO,
        fetch_timeout: Duration::from_secs(120),
    }
}

pub fn reconciler(store: Arc<dyn Store>, fetcher: &ScriptedFetcher) -> Reconciler {
    Reconciler::new(store, Arc::new(fetcher.clone()), fast_options())
}

/// A fully wired service over in-memory collaborators.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub transport: MemoryTransport,
    pub fetcher: ScriptedFetcher,
    pub notifier: RecordingNotifier,
    pub exporter: RecordingExporter,
    pub probe: StaticProbe,
    pub service: SyncService,
}

impl Harness {
    pub async fn new(oldest: u64, stored: &[Question]) -> Self {
        Self::with_store(seeded_store(oldest, stored).await)
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        init_tracing();
        let transport = MemoryTransport::new();
        let fetcher = ScriptedFetcher::new();
        let notifier = RecordingNotifier::new();
        let exporter = RecordingExporter::new();
        let probe = StaticProbe::default();

        let config = SyncConfig {
            failure_batch_interval: Duration::ZERO,
            ..SyncConfig::default()
        };
        let ctx = SyncContext::new(store.clone(), Arc::new(transport.clone()), config);
        let collaborators = Collaborators::new(Arc::new(fetcher.clone()), Arc::new(notifier.clone()))
            .with_exporter(Arc::new(exporter.clone()))
            .with_probe(Arc::new(probe.clone()));
        let service = SyncService::new(ctx, collaborators);

        Self {
            store,
            transport,
            fetcher,
            notifier,
            exporter,
            probe,
            service,
        }
    }

    /// Register and join every channel.
    pub async fn connect(&self) -> qnaplus_sync::realtime::StopHandle {
        self.service.register_channels().await;
        let handle = self.service.context().realtime.start().await;
        settle(10).await;
        handle
    }
}

/// Let spawned tasks run and move paused time forward by `ms`.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
