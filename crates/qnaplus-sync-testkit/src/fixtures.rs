//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use qnaplus_sync_core::{Frontier, Question, QuestionId};
use qnaplus_sync_store::{MemoryStore, Store};

/// Season used by fixtures unless overridden.
pub const SEASON: &str = "2024-2025";

/// Program used by fixtures unless overridden.
pub const PROGRAM: &str = "V5RC";

/// Builder for [`Question`] with sensible defaults.
#[derive(Debug, Clone)]
pub struct QuestionBuilder {
    question: Question,
}

/// Start building question `id`: unanswered, in [`SEASON`] and [`PROGRAM`].
pub fn question(id: u64) -> QuestionBuilder {
    QuestionBuilder {
        question: Question {
            id: QuestionId(id),
            url: format!("https://www.robotevents.com/{PROGRAM}/{SEASON}/QA/{id}"),
            program: PROGRAM.to_string(),
            season: SEASON.to_string(),
            author: "tester".to_string(),
            title: format!("Question {id}"),
            question: format!("Is configuration {id} legal?"),
            question_raw: format!("<p>Is configuration {id} legal?</p>"),
            answer: None,
            answer_raw: None,
            asked_timestamp: "01-Sep-2024".to_string(),
            asked_timestamp_ms: 1_725_148_800_000 + id as i64,
            answered_timestamp: None,
            answered_timestamp_ms: None,
            answered: false,
            tags: Vec::new(),
        },
    }
}

impl QuestionBuilder {
    pub fn program(mut self, program: &str) -> Self {
        self.question.program = program.to_string();
        self
    }

    pub fn season(mut self, season: &str) -> Self {
        self.question.season = season.to_string();
        self
    }

    /// Mark answered with `answer`.
    pub fn answered(mut self, answer: &str) -> Self {
        self.question.answered = true;
        self.question.answer = Some(answer.to_string());
        self.question.answer_raw = Some(format!("<p>{answer}</p>"));
        self.question.answered_timestamp = Some("02-Sep-2024".to_string());
        self.question.answered_timestamp_ms = Some(self.question.asked_timestamp_ms + 86_400_000);
        self
    }

    pub fn unanswered(mut self) -> Self {
        self.question.answered = false;
        self.question.answer = None;
        self.question.answer_raw = None;
        self.question.answered_timestamp = None;
        self.question.answered_timestamp_ms = None;
        self
    }

    pub fn asked_at(mut self, ms: i64) -> Self {
        self.question.asked_timestamp_ms = ms;
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.question.question = text.to_string();
        self
    }

    pub fn build(self) -> Question {
        self.question
    }
}

impl From<QuestionBuilder> for Question {
    fn from(builder: QuestionBuilder) -> Self {
        builder.build()
    }
}

/// A memory store bootstrapped with a frontier at `oldest` and `questions`.
pub async fn seeded_store(oldest: u64, questions: &[Question]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .save_frontier(&Frontier::new(SEASON, QuestionId(oldest)))
        .await
        .expect("save frontier");
    if !questions.is_empty() {
        store.apply_update(questions, &[]).await.expect("seed questions");
    }
    store
}

/// Ids `from..=to` as question ids.
pub fn ids(range: std::ops::RangeInclusive<u64>) -> Vec<QuestionId> {
    range.map(QuestionId).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let q = question(7).build();
        assert_eq!(q.id, QuestionId(7));
        assert!(!q.answered);
        assert!(q.is_open_in(SEASON));

        let a = question(7).answered("Yes.").build();
        assert!(a.answered);
        assert_eq!(a.answer_text(), Some("Yes."));
        assert!(!a.is_open_in(SEASON));
    }

    #[tokio::test]
    async fn test_seeded_store() {
        let store = seeded_store(5, &[question(5).build()]).await;
        let frontier = store.get_frontier().await.unwrap().unwrap();
        assert_eq!(frontier.oldest_unanswered_id, QuestionId(5));
        assert!(store.get_question(QuestionId(5)).await.unwrap().is_some());
    }
}
