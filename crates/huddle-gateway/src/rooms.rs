use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use huddle_types::api::RoomSummary;
use huddle_types::models::{Room, RoomId, RoomKind, User, UserId};

use crate::error::ChatError;
use crate::gateway::GatewayConfig;
use crate::sanitize::{char_len, escape_text};
use crate::store::ChatStore;

/// Room lifecycle and membership rules.
pub struct RoomService<S> {
    store: Arc<S>,
    config: GatewayConfig,
}

impl<S> Clone for RoomService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config,
        }
    }
}

impl<S: ChatStore> RoomService<S> {
    pub fn new(store: Arc<S>, config: GatewayConfig) -> Self {
        Self { store, config }
    }

    /// Create a GROUP room; the creator becomes its first member.
    pub fn create_group_room(&self, name: &str, creator_id: UserId) -> Result<Room, ChatError> {
        if name.trim().is_empty() {
            return Err(ChatError::Validation("room name is required".into()));
        }
        let name = escape_text(name);
        if char_len(&name) > self.config.max_room_name_chars {
            return Err(ChatError::Validation(format!(
                "room name exceeds {} characters",
                self.config.max_room_name_chars
            )));
        }
        self.store
            .find_user(creator_id)?
            .ok_or(ChatError::NotFound("user"))?;

        let room = self.store.create_group_room(&name, creator_id, Utc::now())?;
        info!("User {} created room {} ({})", creator_id, room.id, room.name);
        Ok(room)
    }

    /// The DM room for `{user_a, user_b}`, created on first use. Argument order
    /// does not matter.
    pub fn create_or_get_dm(&self, user_a: UserId, user_b: UserId) -> Result<Room, ChatError> {
        if user_a == user_b {
            return Err(ChatError::Validation("cannot open a DM with yourself".into()));
        }
        let a = self.store.find_user(user_a)?.ok_or(ChatError::NotFound("user"))?;
        let b = self.store.find_user(user_b)?.ok_or(ChatError::NotFound("user"))?;

        let name = escape_text(&format!("{} & {}", a.username, b.username));
        let (room, created) = self.store.find_or_create_dm(a.id, b.id, &name, Utc::now())?;
        if created {
            info!("Opened DM room {} between {} and {}", room.id, a.id, b.id);
        }
        Ok(room)
    }

    /// Join a GROUP room. Joining a room you are already in succeeds.
    pub fn join_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), ChatError> {
        let room = self.store.find_room(room_id)?.ok_or(ChatError::NotFound("room"))?;
        self.store.find_user(user_id)?.ok_or(ChatError::NotFound("user"))?;
        if room.kind == RoomKind::Dm {
            return Err(ChatError::Conflict("DM rooms cannot be joined".into()));
        }
        if self.store.add_member(room_id, user_id, Utc::now())? {
            info!("User {} joined room {}", user_id, room_id);
        }
        Ok(())
    }

    /// Leave a GROUP room. DM membership is fixed at creation.
    pub fn leave_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), ChatError> {
        let room = self.store.find_room(room_id)?.ok_or(ChatError::NotFound("room"))?;
        if room.kind == RoomKind::Dm {
            return Err(ChatError::Conflict("DM rooms cannot be left".into()));
        }
        if !self.store.remove_member(room_id, user_id)? {
            return Err(ChatError::NotMember);
        }
        info!("User {} left room {}", user_id, room_id);
        Ok(())
    }

    /// A room the caller belongs to.
    pub fn get_room(&self, room_id: RoomId, user_id: UserId) -> Result<Room, ChatError> {
        let room = self.store.find_room(room_id)?.ok_or(ChatError::NotFound("room"))?;
        if !self.store.is_member(room_id, user_id)? {
            return Err(ChatError::NotMember);
        }
        Ok(room)
    }

    /// The caller's rooms, most recently joined first, with unread counts and
    /// the latest message for previews.
    pub fn list_rooms(&self, user_id: UserId) -> Result<Vec<RoomSummary>, ChatError> {
        self.store
            .rooms_for_user(user_id)?
            .into_iter()
            .map(|room| -> Result<RoomSummary, ChatError> {
                let last_read_at = self.store.last_read_at(room.id, user_id)?;
                let unread_count = self.store.count_unread(room.id, user_id, last_read_at)?;
                let last = self.store.last_message(room.id)?;
                Ok(RoomSummary {
                    id: room.id,
                    name: room.name,
                    kind: room.kind,
                    unread_count,
                    last_message_at: last.as_ref().map(|m| m.created_at),
                    last_message: last.map(|m| m.content),
                })
            })
            .collect()
    }

    pub fn members(&self, room_id: RoomId) -> Result<Vec<User>, ChatError> {
        Ok(self.store.members(room_id)?)
    }

    pub fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, ChatError> {
        Ok(self.store.is_member(room_id, user_id)?)
    }
}
