//! Strong type definitions for qnaplus-sync.
//!
//! Identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Identifier of a question on the upstream Q&A forum.
///
/// Upstream ids are numeric and ordered by age, which is what lets the
/// frontier be expressed as "the lowest id not yet known to be answered".
/// On the wire and in storage they travel as decimal strings.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuestionId(pub u64);

impl QuestionId {
    /// Create a new QuestionId.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the numeric value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuestionId({})", self.0)
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QuestionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| CoreError::InvalidQuestionId(s.to_string()))
    }
}

impl From<u64> for QuestionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl Serialize for QuestionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QuestionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(Self(n)),
        }
    }
}

/// Opaque identifier of an outbox event.
///
/// Stores generate these; consumers only hand them back for deletion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_id_parse() {
        let id: QuestionId = "12345".parse().unwrap();
        assert_eq!(id, QuestionId(12345));
        assert!("abc".parse::<QuestionId>().is_err());
        assert!("".parse::<QuestionId>().is_err());
    }

    #[test]
    fn test_question_id_orders_numerically() {
        // "9" < "10" numerically even though it sorts after it as text.
        let nine: QuestionId = "9".parse().unwrap();
        let ten: QuestionId = "10".parse().unwrap();
        assert!(nine < ten);
    }

    #[test]
    fn test_question_id_serializes_as_string() {
        let json = serde_json::to_string(&QuestionId(42)).unwrap();
        assert_eq!(json, "\"42\"");

        let from_text: QuestionId = serde_json::from_str("\"42\"").unwrap();
        let from_number: QuestionId = serde_json::from_str("42").unwrap();
        assert_eq!(from_text, from_number);
    }

    #[test]
    fn test_question_id_debug() {
        assert_eq!(format!("{:?}", QuestionId(7)), "QuestionId(7)");
    }
}
