//! Shared process context.

use std::sync::Arc;

use qnaplus_sync_realtime::{SubscriptionManager, Transport};
use qnaplus_sync_store::Store;

use crate::config::SyncConfig;

/// Everything the pipeline components share, built once at startup and
/// handed to each component.
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn Store>,
    pub realtime: SubscriptionManager,
    pub config: Arc<SyncConfig>,
}

impl SyncContext {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        let realtime = SubscriptionManager::new(transport, config.resubscribe.clone());
        Self {
            store,
            realtime,
            config: Arc::new(config),
        }
    }

    /// The realtime transport, for one-off sends.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.realtime.transport()
    }
}
