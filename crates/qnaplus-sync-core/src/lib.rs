//! # qnaplus sync core
//!
//! Pure types for the qnaplus forum mirror: questions, the reconciliation
//! frontier, forum state, domain events and the change classifier.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Question`] - A mirrored forum question
//! - [`QuestionId`] - Numeric, monotonically increasing upstream id
//! - [`Frontier`] - Oldest question not yet known to be answered
//! - [`DomainEvent`] - Closed set of classified changes
//!
//! ## Classification
//!
//! Raw before/after pairs become events via [`classify`]. Answer edits carry
//! a sentence diff, see [`diff`].

pub mod classify;
pub mod diff;
pub mod error;
pub mod event;
pub mod forum;
pub mod frontier;
pub mod question;
pub mod types;

pub use classify::{classify, classify_forum, replay};
pub use diff::{sentence_diff, DiffOp, DiffSpan};
pub use error::{CoreError, Result};
pub use event::{AnswerEditedPayload, AnsweredPayload, DomainEvent, EventKind, ForumChangePayload};
pub use forum::{ForumState, ForumTransition};
pub use frontier::{min_id, oldest_unanswered, Frontier};
pub use question::{Question, RecordChange};
pub use types::{EventId, QuestionId};
