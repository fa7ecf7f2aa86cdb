//! Proptest generators for property-based testing.

use proptest::prelude::*;

use qnaplus_sync_core::{Question, QuestionId, RecordChange};

use crate::fixtures::{question, SEASON};

/// Generate a question id in a realistic range.
pub fn question_id() -> impl Strategy<Value = QuestionId> {
    (1u64..100_000).prop_map(QuestionId)
}

/// Generate a short answer or question text. Sentences end with `.` so the
/// sentence diff has something to split on.
pub fn text() -> impl Strategy<Value = String> {
    prop::collection::vec("[A-Za-z ]{1,20}", 1..4).prop_map(|parts| {
        parts
            .into_iter()
            .map(|p| format!("{}.", p.trim()))
            .collect::<Vec<_>>()
            .join(" ")
    })
}

/// Generate a program name.
pub fn program() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("V5RC".to_string()),
        Just("VIQRC".to_string()),
        Just("VURC".to_string()),
        Just("VAIRC".to_string()),
    ]
}

/// Generate a question, answered or not.
pub fn any_question() -> impl Strategy<Value = Question> {
    (
        question_id(),
        program(),
        text(),
        prop::option::of(text()),
        prop_oneof![Just(SEASON.to_string()), Just("2023-2024".to_string())],
    )
        .prop_map(|(id, program, body, answer, season)| {
            let builder = question(id.0).program(&program).season(&season).text(&body);
            match answer {
                Some(answer) => builder.answered(&answer).build(),
                None => builder.build(),
            }
        })
        .boxed()
}

/// Generate a before/after pair for one question.
///
/// The pair keeps the id and program fixed and varies the answered flag and
/// texts independently, so every classifier branch is reachable.
pub fn record_change() -> impl Strategy<Value = RecordChange> {
    (any_question(), any::<bool>(), prop::option::of(text()), any::<bool>())
        .prop_map(|(old, answered, answer, same_text)| {
            let mut new = old.clone();
            new.answered = answered;
            new.answer = if same_text { old.answer.clone() } else { answer };
            RecordChange::new(old, new)
        })
        .boxed()
}

/// Generate a batch of changes.
pub fn record_changes(max: usize) -> impl Strategy<Value = Vec<RecordChange>> {
    prop::collection::vec(record_change(), 0..max)
}
