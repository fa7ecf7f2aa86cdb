//! Change classification.
//!
//! Turns raw before/after pairs into domain events. Classification is pure
//! and total: every pair yields zero or more events, in pair order, and the
//! rules are not mutually exclusive.

use crate::diff::sentence_diff;
use crate::event::{AnswerEditedPayload, DomainEvent, ForumChangePayload};
use crate::forum::ForumState;
use crate::question::{Question, RecordChange};

/// A question went from unanswered to answered.
fn is_answered(old: &Question, new: &Question) -> bool {
    !old.answered && new.answered
}

/// Both sides carry a non-empty answer and the text differs.
fn is_answer_edited(old: &Question, new: &Question) -> bool {
    match (old.answer_text(), new.answer_text()) {
        (Some(before), Some(after)) => before != after,
        _ => false,
    }
}

/// Classify a batch of question changes.
///
/// Within one pair, `answered` is emitted before `answer_edited`.
pub fn classify(changes: &[RecordChange]) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    for RecordChange { old, new } in changes {
        if is_answered(old, new) {
            events.push(DomainEvent::answered(new.clone()));
        }
        if let (Some(before), Some(after)) = (old.answer_text(), new.answer_text()) {
            if is_answer_edited(old, new) {
                events.push(DomainEvent::AnswerEdited(AnswerEditedPayload {
                    before: old.clone(),
                    after: new.clone(),
                    diff: sentence_diff(before, after),
                }));
            }
        }
    }
    events
}

/// Classify a forum state transition.
pub fn classify_forum(old: &ForumState, new: &ForumState) -> Option<DomainEvent> {
    (old.open != new.open).then(|| {
        DomainEvent::ForumChange(ForumChangePayload {
            before: old.clone(),
            after: new.clone(),
        })
    })
}

/// Operator-requested re-announcements.
///
/// Replays are never derived from a diff; they carry the same shape as
/// `answered`.
pub fn replay<I>(questions: I) -> Vec<DomainEvent>
where
    I: IntoIterator<Item = Question>,
{
    questions.into_iter().map(DomainEvent::replay).collect()
}
