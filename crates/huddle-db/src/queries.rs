use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

use huddle_types::models::{
    Message, MessageId, MessageStatus, MessageStatusKind, NewMessage, Reaction, Room, RoomId,
    RoomKind, RoomMember, User, UserId,
};

use crate::{Database, StoreError, StoreResult};

const USER_COLUMNS: &str = "id, username, email, avatar, is_online, last_seen, created_at";
const ROOM_COLUMNS: &str = "id, name, kind, created_by, created_at";
const MESSAGE_COLUMNS: &str = "id, room_id, sender_id, content, media_url, reply_to_id, created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, email: &str, now: DateTime<Utc>) -> StoreResult<User> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![username, email, to_micros(now)],
            )?;
            let id = conn.last_insert_rowid();
            query_user_by_id(conn, id)?.ok_or(StoreError::NotFound("user"))
        })
    }

    pub fn get_user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                [email],
                user_from_row,
            )
            .optional()
        })
    }

    /// Case-insensitive substring match on username or email.
    pub fn search_users(&self, query: &str, limit: u32) -> StoreResult<Vec<User>> {
        let pattern = like_pattern(query);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE LOWER(username) LIKE ?1 ESCAPE '\\' OR LOWER(email) LIKE ?1 ESCAPE '\\'
                 ORDER BY username
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![pattern, limit], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Going online leaves `last_seen` alone; going offline stamps it.
    pub fn set_online(&self, id: UserId, online: bool, now: DateTime<Utc>) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = if online {
                conn.execute("UPDATE users SET is_online = 1 WHERE id = ?1", [id])?
            } else {
                conn.execute(
                    "UPDATE users SET is_online = 0, last_seen = ?2 WHERE id = ?1",
                    rusqlite::params![id, to_micros(now)],
                )?
            };
            if changed == 0 {
                return Err(StoreError::NotFound("user"));
            }
            Ok(())
        })
    }

    pub fn update_avatar(&self, id: UserId, avatar: Option<&str>) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET avatar = ?2 WHERE id = ?1",
                rusqlite::params![id, avatar],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound("user"));
            }
            Ok(())
        })
    }

    // -- Rooms --

    pub fn get_room(&self, id: RoomId) -> StoreResult<Option<Room>> {
        self.with_conn(|conn| query_room_by_id(conn, id))
    }

    /// Insert a GROUP room and its creator's membership in one transaction.
    pub fn create_group_room(
        &self,
        name: &str,
        creator: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Room> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO rooms (name, kind, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![name, RoomKind::Group.as_str(), creator, to_micros(now)],
            )?;
            let room_id = tx.last_insert_rowid();
            insert_member(tx, room_id, creator, now)?;
            query_room_by_id(tx, room_id)?.ok_or(StoreError::NotFound("room"))
        })
    }

    /// Return the DM room for the unordered pair `{a, b}`, creating it (with
    /// both memberships) if none exists. The boolean is `true` when created.
    ///
    /// The pair key is unique in the schema and the lookup and insert share a
    /// transaction, so two callers racing on the same pair end up with one room.
    pub fn find_or_create_dm(
        &self,
        a: UserId,
        b: UserId,
        name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<(Room, bool)> {
        let key = dm_key(a, b);
        self.with_tx(|tx| {
            let existing = tx
                .query_row(
                    &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE dm_key = ?1"),
                    [&key],
                    room_from_row,
                )
                .optional()?;
            if let Some(room) = existing {
                return Ok((room, false));
            }

            tx.execute(
                "INSERT INTO rooms (name, kind, created_by, created_at, dm_key)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![name, RoomKind::Dm.as_str(), a, to_micros(now), key],
            )?;
            let room_id = tx.last_insert_rowid();
            insert_member(tx, room_id, a, now)?;
            insert_member(tx, room_id, b, now)?;
            let room = query_room_by_id(tx, room_id)?.ok_or(StoreError::NotFound("room"))?;
            Ok((room, true))
        })
    }

    /// Rooms the user belongs to, most recently joined first.
    pub fn get_rooms_for_user(&self, user_id: UserId) -> StoreResult<Vec<Room>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.kind, r.created_by, r.created_at
                 FROM room_members rm
                 JOIN rooms r ON r.id = rm.room_id
                 WHERE rm.user_id = ?1
                 ORDER BY rm.joined_at DESC, r.id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], room_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Members --

    pub fn is_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                [room_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Members of a room in join order.
    pub fn get_members(&self, room_id: RoomId) -> StoreResult<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.email, u.avatar, u.is_online, u.last_seen, u.created_at
                 FROM room_members rm
                 JOIN users u ON u.id = rm.user_id
                 WHERE rm.room_id = ?1
                 ORDER BY rm.joined_at, u.id",
            )?;
            let rows = stmt
                .query_map([room_id], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_membership(&self, room_id: RoomId, user_id: UserId) -> StoreResult<Option<RoomMember>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT room_id, user_id, joined_at, last_read_at
                 FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                [room_id, user_id],
                |row| {
                    Ok(RoomMember {
                        room_id: row.get(0)?,
                        user_id: row.get(1)?,
                        joined_at: from_micros(row.get(2)?),
                        last_read_at: row.get::<_, Option<i64>>(3)?.map(from_micros),
                    })
                },
            )
            .optional()
        })
    }

    /// Returns `false` when the pair was already a member.
    pub fn add_member(&self, room_id: RoomId, user_id: UserId, now: DateTime<Utc>) -> StoreResult<bool> {
        self.with_conn(|conn| insert_member(conn, room_id, user_id, now))
    }

    /// Returns `false` when there was nothing to remove.
    pub fn remove_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                [room_id, user_id],
            )?;
            Ok(removed > 0)
        })
    }

    /// Returns `false` when the user is not a member of the room.
    pub fn set_last_read_at(
        &self,
        room_id: RoomId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE room_members SET last_read_at = ?3 WHERE room_id = ?1 AND user_id = ?2",
                rusqlite::params![room_id, user_id, to_micros(at)],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage) -> StoreResult<Message> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (room_id, sender_id, content, media_url, reply_to_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    msg.room_id,
                    msg.sender_id,
                    msg.content,
                    msg.media_url,
                    msg.reply_to_id,
                    to_micros(msg.created_at)
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_message_by_id(conn, id)?.ok_or(StoreError::NotFound("message"))
        })
    }

    pub fn get_message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        self.with_conn(|conn| query_message_by_id(conn, id))
    }

    /// A page of room history. Pages are cut newest-first, then returned in
    /// chronological order.
    pub fn get_messages(&self, room_id: RoomId, limit: u32, offset: u32) -> StoreResult<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE room_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let mut rows = stmt
                .query_map(rusqlite::params![room_id, limit, offset], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    pub fn get_last_message(&self, room_id: RoomId) -> StoreResult<Option<Message>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE room_id = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1"
                ),
                [room_id],
                message_from_row,
            )
            .optional()
        })
    }

    /// Messages in the room from other senders, created strictly after
    /// `last_read_at` (or all of them when the member never read the room).
    pub fn count_unread(
        &self,
        room_id: RoomId,
        user_id: UserId,
        last_read_at: Option<DateTime<Utc>>,
    ) -> StoreResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = match last_read_at {
                Some(at) => conn.query_row(
                    "SELECT COUNT(*) FROM messages
                     WHERE room_id = ?1 AND sender_id != ?2 AND created_at > ?3",
                    rusqlite::params![room_id, user_id, to_micros(at)],
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE room_id = ?1 AND sender_id != ?2",
                    [room_id, user_id],
                    |row| row.get(0),
                )?,
            };
            Ok(count.max(0) as u64)
        })
    }

    // -- Message status --

    pub fn upsert_message_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: MessageStatusKind,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_status (message_id, user_id, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id, user_id)
                 DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
                rusqlite::params![message_id, user_id, status.as_str(), to_micros(now)],
            )?;
            Ok(())
        })
    }

    pub fn get_message_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> StoreResult<Option<MessageStatus>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT message_id, user_id, status, updated_at
                 FROM message_status WHERE message_id = ?1 AND user_id = ?2",
                [message_id, user_id],
                |row| {
                    let status: String = row.get(2)?;
                    Ok(MessageStatus {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        status: MessageStatusKind::parse(&status).unwrap_or(MessageStatusKind::Sent),
                        updated_at: from_micros(row.get(3)?),
                    })
                },
            )
            .optional()
        })
    }

    // -- Reactions --

    /// Set the user's reaction on a message, replacing any earlier emoji.
    pub fn upsert_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Reaction> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id, user_id) DO UPDATE SET emoji = excluded.emoji",
                rusqlite::params![message_id, user_id, emoji, to_micros(now)],
            )?;
            tx.query_row(
                "SELECT id, message_id, user_id, emoji, created_at
                 FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                [message_id, user_id],
                reaction_from_row,
            )
            .map_err(StoreError::from)
        })
    }

    pub fn get_reactions(&self, message_id: MessageId) -> StoreResult<Vec<Reaction>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, user_id, emoji, created_at
                 FROM reactions WHERE message_id = ?1
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([message_id], reaction_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// `%query%` with the query's own `%`, `_` and `\` matched literally.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::from("%");
    for c in query.trim().to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn dm_key(a: UserId, b: UserId) -> String {
    format!("{}:{}", a.min(b), a.max(b))
}

pub(crate) fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

fn insert_member(
    conn: &Connection,
    room_id: RoomId,
    user_id: UserId,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![room_id, user_id, to_micros(now)],
    )?;
    Ok(inserted > 0)
}

fn query_user_by_id(conn: &Connection, id: UserId) -> StoreResult<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id],
        user_from_row,
    )
    .optional()
}

fn query_room_by_id(conn: &Connection, id: RoomId) -> StoreResult<Option<Room>> {
    conn.query_row(
        &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
        [id],
        room_from_row,
    )
    .optional()
}

fn query_message_by_id(conn: &Connection, id: MessageId) -> StoreResult<Option<Message>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        [id],
        message_from_row,
    )
    .optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        avatar: row.get(3)?,
        is_online: row.get(4)?,
        last_seen: row.get::<_, Option<i64>>(5)?.map(from_micros),
        created_at: from_micros(row.get(6)?),
    })
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    let kind: String = row.get(2)?;
    let kind = RoomKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown room kind '{kind}'").into(),
        )
    })?;
    Ok(Room {
        id: row.get(0)?,
        name: row.get(1)?,
        kind,
        created_by: row.get(3)?,
        created_at: from_micros(row.get(4)?),
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        media_url: row.get(4)?,
        reply_to_id: row.get(5)?,
        created_at: from_micros(row.get(6)?),
    })
}

fn reaction_from_row(row: &Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        id: row.get(0)?,
        message_id: row.get(1)?,
        user_id: row.get(2)?,
        emoji: row.get(3)?,
        created_at: from_micros(row.get(4)?),
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
