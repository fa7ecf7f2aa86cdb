//! # qnaplus-sync Testkit
//!
//! Testing utilities for the qnaplus sync pipeline.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: A question builder and pre-seeded stores
//! - **Fakes**: In-memory fetcher, notifier, exporter, precheck probe and a
//!   fault-injecting store wrapper
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust
//! use qnaplus_sync_testkit::fixtures::question;
//!
//! let q = question(42).program("VIQRC").answered("Legal.").build();
//! assert!(q.answered);
//! ```
//!
//! ## Fakes
//!
//! ```rust
//! use qnaplus_sync_testkit::fakes::ScriptedFetcher;
//! use qnaplus_sync_testkit::fixtures::question;
//! use qnaplus_sync_core::QuestionId;
//!
//! let upstream = ScriptedFetcher::with_questions((1..=3).map(|i| question(i).build()));
//! upstream.fail([QuestionId(2)]);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use qnaplus_sync_testkit::generators::record_changes;
//!
//! proptest! {
//!     #[test]
//!     fn classify_never_panics(changes in record_changes(16)) {
//!         let _ = qnaplus_sync_core::classify(&changes);
//!     }
//! }
//! ```

pub mod fakes;
pub mod fixtures;
pub mod generators;

pub use fakes::{
    Delivery, FaultyStore, FetchCall, RecordingExporter, RecordingNotifier, ScriptedFetcher,
    StaticProbe, StoreOp,
};
pub use fixtures::{ids, question, seeded_store, QuestionBuilder, PROGRAM, SEASON};
pub use generators::{any_question, question_id, record_change, record_changes};
