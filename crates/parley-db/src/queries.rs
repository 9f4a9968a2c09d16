use crate::Database;
use crate::models::{ConversationRow, MessageRow, UserRow};
use anyhow::{Result, anyhow};
use parley_types::models::Conversation;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password) VALUES (?1, ?2)",
                (username, password_hash),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    // -- Conversations --

    /// Create the conversation for an unordered participant pair, or return
    /// the existing one. The pair is canonicalized to (low, high) so repeated
    /// creation always lands on the same row.
    pub fn create_or_get_conversation(&self, a: i64, b: i64) -> Result<ConversationRow> {
        let (low, high) = Conversation::canonical_pair(a, b);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (user_low, user_high) VALUES (?1, ?2)
                 ON CONFLICT(user_low, user_high) DO NOTHING",
                (low, high),
            )?;
            query_conversation_by_pair(conn, low, high)?
                .ok_or_else(|| anyhow!("Conversation ({}, {}) missing after insert", low, high))
        })
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation_by_id(conn, id))
    }

    /// All conversations the user participates in, with the peer's username,
    /// ordered by creation.
    pub fn conversations_for_user(&self, user_id: i64) -> Result<Vec<(ConversationRow, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.user_low, c.user_high, c.blocked_by, c.created_at, u.username
                 FROM conversations c
                 JOIN users u ON u.id = CASE WHEN c.user_low = ?1 THEN c.user_high ELSE c.user_low END
                 WHERE ?1 IN (c.user_low, c.user_high)
                 ORDER BY c.id",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok((
                        ConversationRow {
                            id: row.get(0)?,
                            user_low: row.get(1)?,
                            user_high: row.get(2)?,
                            blocked_by: row.get(3)?,
                            created_at: row.get(4)?,
                        },
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Set or clear the blocked-by reference. The only mutation conversations
    /// ever see.
    pub fn set_conversation_blocked(
        &self,
        conversation_id: i64,
        blocked_by: Option<i64>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET blocked_by = ?2 WHERE id = ?1",
                (conversation_id, blocked_by),
            )?;
            Ok(())
        })
    }

    // -- Messages --

    /// Persist a new message and read the row back so the caller sees the
    /// assigned id and timestamp.
    pub fn insert_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        body: &str,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, sender_id, body) VALUES (?1, ?2, ?3)",
                (conversation_id, sender_id, body),
            )?;
            let id = conn.last_insert_rowid();
            query_message_by_id(conn, id)?
                .ok_or_else(|| anyhow!("Message {} missing after insert", id))
        })
    }

    // -- Device tokens --

    pub fn upsert_device_token(&self, user_id: i64, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO device_tokens (user_id, token) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE
                 SET token = excluded.token, updated_at = datetime('now')",
                (user_id, token),
            )?;
            Ok(())
        })
    }

    pub fn get_device_token(&self, user_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT token FROM device_tokens WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_conversation_by_id(conn: &Connection, id: i64) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_low, user_high, blocked_by, created_at FROM conversations WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], map_conversation_row)
        .optional()?;

    Ok(row)
}

fn query_conversation_by_pair(
    conn: &Connection,
    low: i64,
    high: i64,
) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_low, user_high, blocked_by, created_at
         FROM conversations WHERE user_low = ?1 AND user_high = ?2",
    )?;

    let row = stmt
        .query_row((low, high), map_conversation_row)
        .optional()?;

    Ok(row)
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_low: row.get(1)?,
        user_high: row.get(2)?,
        blocked_by: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn query_message_by_id(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, body, is_read, created_at, edited_at
         FROM messages WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], map_message_row).optional()?;

    Ok(row)
}

pub(crate) fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        body: row.get(3)?,
        is_read: row.get(4)?,
        created_at: row.get(5)?,
        edited_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
