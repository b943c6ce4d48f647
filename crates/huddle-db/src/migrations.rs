use rusqlite::Connection;
use tracing::info;

use crate::StoreResult;

/// Timestamps are stored as INTEGER microseconds since the epoch so that
/// range comparisons in SQL are numeric.
pub fn run(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            avatar      TEXT,
            is_online   INTEGER NOT NULL DEFAULT 0,
            last_seen   INTEGER,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            kind        TEXT NOT NULL CHECK (kind IN ('GROUP', 'DM')),
            created_by  INTEGER NOT NULL REFERENCES users(id),
            created_at  INTEGER NOT NULL,
            -- 'low:high' user ids for DM rooms, NULL for groups
            dm_key      TEXT UNIQUE
        );

        CREATE TABLE IF NOT EXISTS room_members (
            room_id       INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            user_id       INTEGER NOT NULL REFERENCES users(id),
            joined_at     INTEGER NOT NULL,
            last_read_at  INTEGER,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_room_members_user
            ON room_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id      INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            sender_id    INTEGER NOT NULL REFERENCES users(id),
            content      TEXT NOT NULL,
            media_url    TEXT,
            reply_to_id  INTEGER,
            created_at   INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS message_status (
            message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            status      TEXT NOT NULL CHECK (status IN ('SENT', 'DELIVERED', 'READ')),
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS reactions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
