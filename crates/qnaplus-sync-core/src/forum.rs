//! Per-program forum state.

use serde::{Deserialize, Serialize};

/// Whether a program's Q&A forum is currently accepting questions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForumState {
    pub program: String,
    pub open: bool,
}

impl ForumState {
    pub fn new(program: impl Into<String>, open: bool) -> Self {
        Self {
            program: program.into(),
            open,
        }
    }

    pub fn opened(program: impl Into<String>) -> Self {
        Self::new(program, true)
    }

    pub fn closed(program: impl Into<String>) -> Self {
        Self::new(program, false)
    }
}

/// A persisted flip of a program's forum state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumTransition {
    pub before: ForumState,
    pub after: ForumState,
}
