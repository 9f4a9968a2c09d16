use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per unordered participant pair, smaller id first.
        CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_low    INTEGER NOT NULL REFERENCES users(id),
            user_high   INTEGER NOT NULL REFERENCES users(id),
            blocked_by  INTEGER REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_low, user_high),
            CHECK(user_low < user_high)
        );

        -- Message ids come from AUTOINCREMENT: strictly increasing across the
        -- whole table, never reused. The core never generates ids itself.
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id),
            sender_id       INTEGER NOT NULL REFERENCES users(id),
            body            TEXT NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            edited_at       TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(conversation_id, is_read, sender_id);

        -- One push token per user, upserted on registration.
        CREATE TABLE IF NOT EXISTS device_tokens (
            user_id     INTEGER PRIMARY KEY REFERENCES users(id),
            token       TEXT NOT NULL,
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
