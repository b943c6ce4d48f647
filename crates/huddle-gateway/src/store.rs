use chrono::{DateTime, Utc};
use tracing::error;

use huddle_db::{Database, StoreResult};
use huddle_types::models::{
    Message, MessageId, MessageStatusKind, NewMessage, Reaction, Room, RoomId, User, UserId,
};

use crate::error::GatewayError;

/// Durable storage consumed by the chat core.
///
/// Lookups return `Ok(None)` for a missing row; `Err` means the store could
/// not answer. Implementations are synchronous; async callers go through
/// [`run_blocking`].
pub trait ChatStore: Send + Sync + 'static {
    // -- Users --
    fn find_user(&self, id: UserId) -> StoreResult<Option<User>>;
    fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    fn search_users(&self, query: &str, limit: u32) -> StoreResult<Vec<User>>;
    fn set_online(&self, id: UserId, online: bool, now: DateTime<Utc>) -> StoreResult<()>;
    fn update_avatar(&self, id: UserId, avatar: Option<&str>) -> StoreResult<()>;

    // -- Rooms --
    fn find_room(&self, id: RoomId) -> StoreResult<Option<Room>>;
    fn create_group_room(&self, name: &str, creator: UserId, now: DateTime<Utc>) -> StoreResult<Room>;
    /// Atomic lookup-or-create for the unordered pair; `true` when created.
    fn find_or_create_dm(
        &self,
        a: UserId,
        b: UserId,
        name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<(Room, bool)>;
    fn rooms_for_user(&self, user_id: UserId) -> StoreResult<Vec<Room>>;

    // -- Members --
    fn is_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool>;
    fn members(&self, room_id: RoomId) -> StoreResult<Vec<User>>;
    fn add_member(&self, room_id: RoomId, user_id: UserId, now: DateTime<Utc>) -> StoreResult<bool>;
    fn remove_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool>;
    /// `None` for a member who never read the room, and for non-members.
    fn last_read_at(&self, room_id: RoomId, user_id: UserId) -> StoreResult<Option<DateTime<Utc>>>;
    fn set_last_read_at(&self, room_id: RoomId, user_id: UserId, at: DateTime<Utc>) -> StoreResult<bool>;

    // -- Messages --
    fn find_message(&self, id: MessageId) -> StoreResult<Option<Message>>;
    fn save_message(&self, msg: &NewMessage) -> StoreResult<Message>;
    fn messages_by_room(&self, room_id: RoomId, limit: u32, offset: u32) -> StoreResult<Vec<Message>>;
    fn last_message(&self, room_id: RoomId) -> StoreResult<Option<Message>>;
    fn count_unread(
        &self,
        room_id: RoomId,
        user_id: UserId,
        last_read_at: Option<DateTime<Utc>>,
    ) -> StoreResult<u64>;

    // -- Status & reactions --
    fn upsert_message_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: MessageStatusKind,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;
    /// `Sent` when no status row exists for the pair.
    fn message_status(&self, message_id: MessageId, user_id: UserId) -> StoreResult<MessageStatusKind>;
    fn upsert_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Reaction>;
    fn reactions(&self, message_id: MessageId) -> StoreResult<Vec<Reaction>>;
}

impl ChatStore for Database {
    fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.get_user_by_id(id)
    }

    fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.get_user_by_username(username)
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.get_user_by_email(email)
    }

    fn search_users(&self, query: &str, limit: u32) -> StoreResult<Vec<User>> {
        Database::search_users(self, query, limit)
    }

    fn set_online(&self, id: UserId, online: bool, now: DateTime<Utc>) -> StoreResult<()> {
        Database::set_online(self, id, online, now)
    }

    fn update_avatar(&self, id: UserId, avatar: Option<&str>) -> StoreResult<()> {
        Database::update_avatar(self, id, avatar)
    }

    fn find_room(&self, id: RoomId) -> StoreResult<Option<Room>> {
        self.get_room(id)
    }

    fn create_group_room(&self, name: &str, creator: UserId, now: DateTime<Utc>) -> StoreResult<Room> {
        Database::create_group_room(self, name, creator, now)
    }

    fn find_or_create_dm(
        &self,
        a: UserId,
        b: UserId,
        name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<(Room, bool)> {
        Database::find_or_create_dm(self, a, b, name, now)
    }

    fn rooms_for_user(&self, user_id: UserId) -> StoreResult<Vec<Room>> {
        self.get_rooms_for_user(user_id)
    }

    fn is_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool> {
        Database::is_member(self, room_id, user_id)
    }

    fn members(&self, room_id: RoomId) -> StoreResult<Vec<User>> {
        self.get_members(room_id)
    }

    fn add_member(&self, room_id: RoomId, user_id: UserId, now: DateTime<Utc>) -> StoreResult<bool> {
        Database::add_member(self, room_id, user_id, now)
    }

    fn remove_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool> {
        Database::remove_member(self, room_id, user_id)
    }

    fn last_read_at(&self, room_id: RoomId, user_id: UserId) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .get_membership(room_id, user_id)?
            .and_then(|m| m.last_read_at))
    }

    fn set_last_read_at(&self, room_id: RoomId, user_id: UserId, at: DateTime<Utc>) -> StoreResult<bool> {
        Database::set_last_read_at(self, room_id, user_id, at)
    }

    fn find_message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        self.get_message(id)
    }

    fn save_message(&self, msg: &NewMessage) -> StoreResult<Message> {
        self.insert_message(msg)
    }

    fn messages_by_room(&self, room_id: RoomId, limit: u32, offset: u32) -> StoreResult<Vec<Message>> {
        self.get_messages(room_id, limit, offset)
    }

    fn last_message(&self, room_id: RoomId) -> StoreResult<Option<Message>> {
        self.get_last_message(room_id)
    }

    fn count_unread(
        &self,
        room_id: RoomId,
        user_id: UserId,
        last_read_at: Option<DateTime<Utc>>,
    ) -> StoreResult<u64> {
        Database::count_unread(self, room_id, user_id, last_read_at)
    }

    fn upsert_message_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: MessageStatusKind,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        Database::upsert_message_status(self, message_id, user_id, status, now)
    }

    fn message_status(&self, message_id: MessageId, user_id: UserId) -> StoreResult<MessageStatusKind> {
        Ok(self
            .get_message_status(message_id, user_id)?
            .map_or(MessageStatusKind::Sent, |s| s.status))
    }

    fn upsert_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Reaction> {
        Database::upsert_reaction(self, message_id, user_id, emoji, now)
    }

    fn reactions(&self, message_id: MessageId) -> StoreResult<Vec<Reaction>> {
        self.get_reactions(message_id)
    }
}

/// Run blocking store work off the async runtime.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, GatewayError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        GatewayError::Runtime(e.to_string())
    })
}
