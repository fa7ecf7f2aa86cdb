//! # qnaplus sync
//!
//! The qnaplus forum mirror pipeline: reconciliation against the upstream
//! forum, a durable outbox with at-least-once delivery, micro-batched
//! change classification and the realtime handlers that feed it.
//!
//! ## Overview
//!
//! ```text
//! upstream forum ──> Reconciler ──> Store (questions, frontier, outbox)
//!                                         │
//!  db-changes / renotify-queue ──> ChangeQueue ──┤
//!                                         v
//!                                    Dispatcher ──> Notifier
//! ```
//!
//! - **Reconciler**: advances the frontier and retries the failure set
//! - **ChangeQueue**: debounces raw before/after pairs, classifies them
//! - **Dispatcher**: drains the outbox by kind and program, deletes only
//!   what was delivered
//! - **ProtectedTask**: the scheduled job never overlaps itself
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use qnaplus_sync::{Collaborators, SyncConfig, SyncContext, SyncService};
//! use qnaplus_sync::realtime::MemoryTransport;
//! use qnaplus_sync::store::SqliteStore;
//!
//! async fn example(collaborators: Collaborators) -> qnaplus_sync::Result<()> {
//!     let config = SyncConfig::from_env()?;
//!     let store = Arc::new(SqliteStore::open(&config.database_path)?);
//!     let ctx = SyncContext::new(store, Arc::new(MemoryTransport::new()), config);
//!
//!     let service = SyncService::new(ctx, collaborators);
//!     let running = service.start().await?;
//!     // ...
//!     running.shutdown().await
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `qnaplus_sync::core` - Domain types and the change classifier
//! - `qnaplus_sync::store` - Storage abstraction and SQLite
//! - `qnaplus_sync::realtime` - Channels and the subscription manager

pub mod batch;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod fetch;
pub mod forum;
pub mod notify;
pub mod precheck;
pub mod reconcile;
pub mod renotify;
pub mod replay;
pub mod schedule;
pub mod service;

// Re-export component crates
pub use qnaplus_sync_core as core;
pub use qnaplus_sync_realtime as realtime;
pub use qnaplus_sync_store as store;

pub use batch::{BatchQueue, ChangeQueue};
pub use config::SyncConfig;
pub use context::SyncContext;
pub use dispatch::{DispatchReport, Dispatcher};
pub use error::{NotifyError, Result, SyncError};
pub use export::export_questions;
pub use fetch::{FetchOutcome, Fetcher};
pub use forum::{ForumStateListener, ForumStateUpdater};
pub use notify::{Exporter, Notifier, EXPORT_FILE_NAME};
pub use precheck::{PrecheckProbe, PrecheckResponder};
pub use reconcile::{ReconcileOptions, Reconciler, UpdateResult};
pub use renotify::{PublishOutcome, RenotifyConsumer, RenotifyPublisher};
pub use replay::{queue_replay, queue_replay_since, ReplayReport};
pub use schedule::{ProtectedTask, Scheduler, TriggerOutcome};
pub use service::{Collaborators, JobReport, Running, SyncService};
