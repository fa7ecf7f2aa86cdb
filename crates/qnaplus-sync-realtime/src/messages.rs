//! Wire names and payloads carried over realtime channels.
//!
//! Topic and event names are shared with other processes and must not
//! change.

use serde::{Deserialize, Serialize};

use qnaplus_sync_core::{Question, QuestionId};

/// Channel topic names.
pub mod topics {
    /// Raw before/after question updates.
    pub const DB_CHANGES: &str = "db-changes";
    /// Renotify queue flushes and their acknowledgement.
    pub const RENOTIFY_QUEUE: &str = "renotify-queue";
    /// Existence checks for question ids.
    pub const PRECHECK: &str = "precheck";
    /// Per-program forum state flips.
    pub const PROGRAM_STATES: &str = "program-states";
}

/// Broadcast event names.
pub mod events {
    pub const RENOTIFY_QUEUE_FLUSH: &str = "renotify_queue_flush";
    pub const RENOTIFY_QUEUE_FLUSH_ACK: &str = "renotify_queue_flush_ack";
    pub const PRECHECK_REQUEST: &str = "precheck-request";
    pub const PRECHECK_RESPONSE: &str = "precheck-response";
    /// A question row changed. Payload is a `RecordChange`.
    pub const QUESTION_UPDATE: &str = "question_update";
    /// A forum state row changed. Payload is a `ForumStateUpdate`.
    pub const FORUM_STATE_UPDATE: &str = "forum_state_update";
}

/// One message on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub event: String,
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Encode `payload` as the message body.
    pub fn encode<T: Serialize>(event: impl Into<String>, payload: &T) -> serde_json::Result<Self> {
        Ok(Self::new(event, serde_json::to_value(payload)?))
    }

    /// Decode the message body.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}

/// Body of `renotify_queue_flush`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenotifyPayload {
    pub questions: Vec<Question>,
}

/// Body of `precheck-request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecheckRequest {
    /// Per-request room to answer on.
    pub room: String,
    pub id: QuestionId,
}

/// Body of `precheck-response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecheckResponse {
    pub exists: bool,
}

/// Body of `forum_state_update`, mirroring a row update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumStateUpdate {
    pub program: String,
    /// Previous flag; absent when the old row could not be read.
    pub old_open: Option<bool>,
    pub new_open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precheck_request_wire_shape() {
        let msg = Message::encode(
            events::PRECHECK_REQUEST,
            &PrecheckRequest {
                room: "precheck-abc".into(),
                id: QuestionId(1234),
            },
        )
        .unwrap();
        assert_eq!(msg.payload, serde_json::json!({"room": "precheck-abc", "id": "1234"}));

        let back: PrecheckRequest = msg.decode().unwrap();
        assert_eq!(back.id, QuestionId(1234));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let msg = Message::new(events::PRECHECK_RESPONSE, serde_json::json!({"exist": true}));
        assert!(msg.decode::<PrecheckResponse>().is_err());
    }
}
