//! The mirrored record: a question from the upstream Q&A forum.

use serde::{Deserialize, Serialize};

use crate::types::QuestionId;

/// A question mirrored from the upstream forum.
///
/// Identity (`id`) never changes. Everything else may be rewritten by a
/// later fetch; the interesting transitions are `answered` flipping to
/// `true` and `answer` being edited after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    pub url: String,
    /// Competition program the question was asked under (e.g. `V5RC`).
    pub program: String,
    /// Season string, `YYYY-YYYY`.
    pub season: String,
    pub author: String,
    pub title: String,
    pub question: String,
    pub question_raw: String,
    pub answer: Option<String>,
    pub answer_raw: Option<String>,
    pub asked_timestamp: String,
    pub asked_timestamp_ms: i64,
    pub answered_timestamp: Option<String>,
    pub answered_timestamp_ms: Option<i64>,
    pub answered: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Question {
    /// Whether a stored copy must be rewritten to match `other`.
    ///
    /// Only question text, answer text and the answered flag count. A write
    /// that changes none of them must not happen, since every write fans out
    /// as a change notification downstream.
    pub fn content_differs(&self, other: &Question) -> bool {
        self.question != other.question
            || self.answer != other.answer
            || self.answered != other.answered
    }

    /// The answer text, if present and non-empty.
    pub fn answer_text(&self) -> Option<&str> {
        self.answer.as_deref().filter(|a| !a.is_empty())
    }

    /// Whether this question belongs to `season` and is still unanswered.
    pub fn is_open_in(&self, season: &str) -> bool {
        !self.answered && self.season == season
    }
}

/// A raw before/after pair for one question, as carried on `db-changes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChange {
    pub old: Question,
    pub new: Question,
}

impl RecordChange {
    pub fn new(old: Question, new: Question) -> Self {
        Self { old, new }
    }

    /// Build the pair used to re-announce a question that is already
    /// answered: the previous side is the same question marked unanswered.
    pub fn renotify(question: Question) -> Self {
        let mut old = question.clone();
        old.answered = false;
        Self { old, new: question }
    }
}
