//! Conversation and message records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, UserId};

/// A persisted chat message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: ConversationId,
    pub author: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation with its participant set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub name: String,
    pub author: UserId,
    pub participants: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Check whether a user participates in this conversation.
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }
}

/// Result of removing a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalOutcome {
    /// The user was removed from the participant set.
    ParticipantRemoved,
    /// The user was the conversation's author, so the conversation was deleted.
    ConversationDeleted,
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_outcome_wire_names() {
        let json = serde_json::to_string(&RemovalOutcome::ConversationDeleted).unwrap();
        assert_eq!(json, "\"conversation_deleted\"");

        let parsed: RemovalOutcome = serde_json::from_str("\"participant_removed\"").unwrap();
        assert_eq!(parsed, RemovalOutcome::ParticipantRemoved);
    }
}
