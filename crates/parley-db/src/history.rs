//! History pagination engine: pure query logic over persisted messages.
//!
//! Every window is returned ascending by message id. Boundary metadata names
//! the ids immediately adjacent to the window in full conversation history,
//! so clients know whether more exists in either direction without counting.

use anyhow::Result;
use rusqlite::Connection;

use parley_types::api::WindowMetadata;
use parley_types::frames::PointMetadata;

use crate::Database;
use crate::models::MessageRow;
use crate::queries::{OptionalExt, map_message_row};

/// Where to anchor a history fetch. `Before`/`After` exclude the boundary id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// No cursor: anchor on the first unread message by the counterpart,
    /// falling back to the tail of history.
    Initial,
    Before(i64),
    After(i64),
    /// Both bounds given: an exclusive bounded range.
    Between { after: i64, before: i64 },
}

impl Database {
    pub fn fetch_window(
        &self,
        conversation_id: i64,
        requester_id: i64,
        cursor: Cursor,
        limit: u32,
    ) -> Result<(Vec<MessageRow>, Option<WindowMetadata>)> {
        self.with_conn(|conn| fetch_window(conn, conversation_id, requester_id, cursor, limit))
    }

    /// Mark every unread counterpart-authored message with id <= `until_id`
    /// as read. Idempotent; returns the number of rows that flipped.
    pub fn mark_read_until(
        &self,
        conversation_id: i64,
        requester_id: i64,
        until_id: i64,
    ) -> Result<usize> {
        self.with_conn(|conn| mark_read_until(conn, conversation_id, requester_id, until_id))
    }

    /// Point metadata for a single message, computed right after persisting it.
    pub fn point_metadata(&self, conversation_id: i64, message_id: i64) -> Result<PointMetadata> {
        self.with_conn(|conn| {
            Ok(PointMetadata {
                previous_id: adjacent_id(conn, conversation_id, message_id, Direction::Before)?,
            })
        })
    }
}

pub fn fetch_window(
    conn: &Connection,
    conversation_id: i64,
    requester_id: i64,
    cursor: Cursor,
    limit: u32,
) -> Result<(Vec<MessageRow>, Option<WindowMetadata>)> {
    let rows = match cursor {
        Cursor::Before(x) => {
            let mut rows = select_descending(conn, conversation_id, Some(x), limit)?;
            rows.reverse();
            rows
        }
        Cursor::After(x) => select_range(conn, conversation_id, Some(x), None, limit)?,
        Cursor::Between { after, before } => {
            select_range(conn, conversation_id, Some(after), Some(before), limit)?
        }
        Cursor::Initial => initial_window(conn, conversation_id, requester_id, limit)?,
    };

    // Empty windows carry no metadata
    let Some((first, last)) = rows.first().zip(rows.last()) else {
        return Ok((rows, None));
    };

    let metadata = WindowMetadata {
        previous_id: adjacent_id(conn, conversation_id, first.id, Direction::Before)?,
        next_id: adjacent_id(conn, conversation_id, last.id, Direction::After)?,
    };

    Ok((rows, Some(metadata)))
}

/// Default (no-cursor) window: find the earliest unread message authored by
/// the counterpart and center it, so the client gets leading context before
/// the unread boundary. With nothing unread, return the tail of history.
fn initial_window(
    conn: &Connection,
    conversation_id: i64,
    requester_id: i64,
    limit: u32,
) -> Result<Vec<MessageRow>> {
    let Some(anchor) = first_unread_anchor(conn, conversation_id, requester_id)? else {
        let mut rows = select_descending(conn, conversation_id, None, limit)?;
        rows.reverse();
        return Ok(rows);
    };

    // Count back middle positions from the anchor inclusive; if history is
    // shorter than that, start from the earliest message.
    let middle = limit / 2 + 1;
    let low: Option<i64> = conn
        .query_row(
            "SELECT id FROM messages
             WHERE conversation_id = ?1 AND id <= ?2
             ORDER BY id DESC LIMIT 1 OFFSET ?3",
            (conversation_id, anchor, i64::from(middle) - 1),
            |row| row.get(0),
        )
        .optional()?;
    let low = match low {
        Some(id) => id,
        None => conn.query_row(
            "SELECT MIN(id) FROM messages WHERE conversation_id = ?1 AND id <= ?2",
            (conversation_id, anchor),
            |row| row.get(0),
        )?,
    };

    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, body, is_read, created_at, edited_at
         FROM messages
         WHERE conversation_id = ?1 AND id >= ?2
         ORDER BY id ASC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map((conversation_id, low, i64::from(limit)), map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Id of the earliest unread message whose sender is not the requester.
fn first_unread_anchor(
    conn: &Connection,
    conversation_id: i64,
    requester_id: i64,
) -> Result<Option<i64>> {
    let anchor: Option<i64> = conn.query_row(
        "SELECT MIN(id) FROM messages
         WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
        (conversation_id, requester_id),
        |row| row.get(0),
    )?;
    Ok(anchor)
}

fn select_descending(
    conn: &Connection,
    conversation_id: i64,
    before: Option<i64>,
    limit: u32,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, body, is_read, created_at, edited_at
         FROM messages
         WHERE conversation_id = ?1 AND id < ?2
         ORDER BY id DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(
            (conversation_id, before.unwrap_or(i64::MAX), i64::from(limit)),
            map_message_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn select_range(
    conn: &Connection,
    conversation_id: i64,
    after: Option<i64>,
    before: Option<i64>,
    limit: u32,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, body, is_read, created_at, edited_at
         FROM messages
         WHERE conversation_id = ?1 AND id > ?2 AND id < ?3
         ORDER BY id ASC LIMIT ?4",
    )?;
    let rows = stmt
        .query_map(
            (
                conversation_id,
                after.unwrap_or(0),
                before.unwrap_or(i64::MAX),
                i64::from(limit),
            ),
            map_message_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[derive(Clone, Copy)]
enum Direction {
    Before,
    After,
}

/// Id of the message immediately adjacent to `message_id` in the
/// conversation's full history, or None at the edge.
fn adjacent_id(
    conn: &Connection,
    conversation_id: i64,
    message_id: i64,
    direction: Direction,
) -> Result<Option<i64>> {
    let sql = match direction {
        Direction::Before => {
            "SELECT MAX(id) FROM messages WHERE conversation_id = ?1 AND id < ?2"
        }
        Direction::After => "SELECT MIN(id) FROM messages WHERE conversation_id = ?1 AND id > ?2",
    };
    let id: Option<i64> = conn.query_row(sql, (conversation_id, message_id), |row| row.get(0))?;
    Ok(id)
}

pub fn mark_read_until(
    conn: &Connection,
    conversation_id: i64,
    requester_id: i64,
    until_id: i64,
) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE messages SET is_read = 1
         WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0 AND id <= ?3",
        (conversation_id, requester_id, until_id),
    )?;
    Ok(changed)
}
