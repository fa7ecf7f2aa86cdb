//! # qnaplus sync store
//!
//! Storage abstraction for the qnaplus mirror. Provides a trait-based
//! interface with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The store holds everything the pipeline must not lose between runs: the
//! mirrored questions, the reconciliation frontier, the failure set, the
//! outbox of pending domain events, per-program forum state and the
//! renotify queue. There is no in-memory state carried from one run to the
//! next; every run re-derives its work from here.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`UpsertReport`] - What a change-only upsert actually wrote
//! - [`OutboxEntry`] - A pending event with its outbox id
//!
//! ## Usage
//!
//! ```rust,no_run
//! use qnaplus_sync_store::{SqliteStore, Store};
//!
//! async fn example() -> qnaplus_sync_store::Result<()> {
//!     let store = SqliteStore::open("qnaplus.db")?;
//!     store.ping().await?;
//!
//!     for (kind, entries) in store.drain_grouped().await? {
//!         println!("{kind}: {} pending", entries.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{OutboxEntry, Store, StoreExt, UpsertReport};
