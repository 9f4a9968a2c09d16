//! Database row types — these map directly to SQLite rows.
//! Distinct from the parley-types API models to keep the DB layer independent;
//! `into_model` conversions parse the SQLite timestamp strings.

use chrono::{DateTime, Utc};
use tracing::warn;

use parley_types::models::{Conversation, Message};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: i64,
    pub user_low: i64,
    pub user_high: i64,
    pub blocked_by: Option<i64>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub is_read: bool,
    pub created_at: String,
    pub edited_at: Option<String>,
}

impl ConversationRow {
    pub fn is_participant(&self, user_id: i64) -> bool {
        user_id == self.user_low || user_id == self.user_high
    }

    pub fn into_model(self) -> Conversation {
        Conversation {
            id: self.id,
            user_low: self.user_low,
            user_high: self.user_high,
            blocked_by: self.blocked_by,
            created_at: parse_timestamp(&self.created_at, "conversation", self.id),
        }
    }
}

impl MessageRow {
    pub fn into_model(self) -> Message {
        let created_at = parse_timestamp(&self.created_at, "message", self.id);
        let edited_at = self
            .edited_at
            .as_deref()
            .map(|ts| parse_timestamp(ts, "message", self.id));
        Message {
            id: self.id,
            text: self.body,
            sender_id: self.sender_id,
            is_read: self.is_read,
            created_at,
            edited_at,
        }
    }
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Try RFC 3339 first, then parse as naive UTC and convert.
fn parse_timestamp(raw: &str, table: &str, id: i64) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on {} {}: {}", raw, table, id, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_datetime_format() {
        let ts = parse_timestamp("2026-08-30 12:00:00", "message", 1);
        assert_eq!(ts.to_rfc3339(), "2026-08-30T12:00:00+00:00");
    }

    #[test]
    fn corrupt_timestamp_falls_back_to_default() {
        let ts = parse_timestamp("not-a-date", "message", 1);
        assert_eq!(ts, DateTime::<Utc>::default());
    }
}
