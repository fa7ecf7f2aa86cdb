//! Domain events: classified, typed notifications derived from raw changes.
//!
//! The set of events is closed. Every consumer (outbox topics, grouping,
//! rendering) matches on [`DomainEvent`] or [`EventKind`] exhaustively, so a
//! new kind cannot be added without the compiler pointing at each of them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diff::DiffSpan;
use crate::error::{CoreError, Result};
use crate::forum::ForumState;
use crate::question::Question;

/// Discriminator for domain events, also used as the outbox topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Answered,
    AnswerEdited,
    Replay,
    ForumChange,
}

impl EventKind {
    /// All kinds, in topic order.
    pub const ALL: [EventKind; 4] = [
        EventKind::Answered,
        EventKind::AnswerEdited,
        EventKind::Replay,
        EventKind::ForumChange,
    ];

    /// Stable topic name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::Answered => "answered",
            EventKind::AnswerEdited => "answer_edited",
            EventKind::Replay => "replay",
            EventKind::ForumChange => "forum_change",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::UnknownEventKind(s.to_string()))
    }
}

/// Payload of `answered` and `replay` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnsweredPayload {
    pub question: Question,
}

/// Payload of `answer_edited` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEditedPayload {
    pub before: Question,
    pub after: Question,
    pub diff: Vec<DiffSpan>,
}

/// Payload of `forum_change` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumChangePayload {
    pub before: ForumState,
    pub after: ForumState,
}

/// A classified change ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// A question went from unanswered to answered.
    Answered(AnsweredPayload),
    /// An existing answer's text changed.
    AnswerEdited(AnswerEditedPayload),
    /// An operator asked for a question to be announced again.
    Replay(AnsweredPayload),
    /// A program's forum opened or closed.
    ForumChange(ForumChangePayload),
}

impl DomainEvent {
    pub fn answered(question: Question) -> Self {
        DomainEvent::Answered(AnsweredPayload { question })
    }

    pub fn replay(question: Question) -> Self {
        DomainEvent::Replay(AnsweredPayload { question })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::Answered(_) => EventKind::Answered,
            DomainEvent::AnswerEdited(_) => EventKind::AnswerEdited,
            DomainEvent::Replay(_) => EventKind::Replay,
            DomainEvent::ForumChange(_) => EventKind::ForumChange,
        }
    }

    /// The recipient key deliveries are grouped by: the program.
    pub fn group_key(&self) -> &str {
        match self {
            DomainEvent::Answered(p) | DomainEvent::Replay(p) => &p.question.program,
            DomainEvent::AnswerEdited(p) => &p.after.program,
            DomainEvent::ForumChange(p) => &p.after.program,
        }
    }

    /// The question this event is about, if any.
    pub fn question(&self) -> Option<&Question> {
        match self {
            DomainEvent::Answered(p) | DomainEvent::Replay(p) => Some(&p.question),
            DomainEvent::AnswerEdited(p) => Some(&p.after),
            DomainEvent::ForumChange(_) => None,
        }
    }

    /// Encode the payload half of an outbox row.
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        let value = match self {
            DomainEvent::Answered(p) | DomainEvent::Replay(p) => serde_json::to_value(p)?,
            DomainEvent::AnswerEdited(p) => serde_json::to_value(p)?,
            DomainEvent::ForumChange(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Rebuild an event from an outbox row's topic and payload.
    pub fn from_payload(kind: EventKind, payload: serde_json::Value) -> Result<Self> {
        let malformed = |source| CoreError::MalformedPayload {
            kind: kind.as_str(),
            source,
        };
        Ok(match kind {
            EventKind::Answered => {
                DomainEvent::Answered(serde_json::from_value(payload).map_err(malformed)?)
            }
            EventKind::AnswerEdited => {
                DomainEvent::AnswerEdited(serde_json::from_value(payload).map_err(malformed)?)
            }
            EventKind::Replay => {
                DomainEvent::Replay(serde_json::from_value(payload).map_err(malformed)?)
            }
            EventKind::ForumChange => {
                DomainEvent::ForumChange(serde_json::from_value(payload).map_err(malformed)?)
            }
        })
    }
}
