use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A canonical 1:1 conversation. The numerically smaller participant id is
/// always stored as `user_low`, so one unordered pair maps to exactly one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub user_low: i64,
    pub user_high: i64,
    /// Participant id of whoever blocked the conversation, if anyone.
    pub blocked_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Order an unordered participant pair into (user_low, user_high).
    pub fn canonical_pair(a: i64, b: i64) -> (i64, i64) {
        if a < b { (a, b) } else { (b, a) }
    }

    pub fn is_participant(&self, user_id: i64) -> bool {
        user_id == self.user_low || user_id == self.user_high
    }

    /// The counterpart of `user_id` in this conversation.
    /// Callers must check `is_participant` first.
    pub fn other_participant(&self, user_id: i64) -> i64 {
        if user_id == self.user_low {
            self.user_high
        } else {
            self.user_low
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_by.is_some()
    }
}

/// A persisted chat message. Immutable after creation except for the read
/// flag (false -> true only) and the edit timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub text: String,
    pub sender_id: i64,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub edited_at: Option<DateTime<Utc>>,
}
