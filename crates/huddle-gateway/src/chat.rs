use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use huddle_types::models::{
    Message, MessageId, MessageStatusKind, NewMessage, Reaction, RoomId, UserId,
};

use crate::error::ChatError;
use crate::gateway::GatewayConfig;
use crate::sanitize::{char_len, escape_message};
use crate::store::ChatStore;

/// Message-level rules: sending, read receipts, reactions, history, unread counts.
pub struct ChatService<S> {
    store: Arc<S>,
    config: GatewayConfig,
}

impl<S> Clone for ChatService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config,
        }
    }
}

impl<S: ChatStore> ChatService<S> {
    pub fn new(store: Arc<S>, config: GatewayConfig) -> Self {
        Self { store, config }
    }

    /// Store a message from a room member.
    ///
    /// A reply target that cannot be found is dropped from the message rather
    /// than failing the send.
    pub fn send_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: &str,
        reply_to_id: Option<MessageId>,
    ) -> Result<Message, ChatError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ChatError::Validation("message content is empty".into()));
        }
        let content = escape_message(trimmed);
        if char_len(&content) > self.config.max_message_chars {
            return Err(ChatError::Validation(format!(
                "message exceeds {} characters",
                self.config.max_message_chars
            )));
        }

        if !self.store.is_member(room_id, sender_id)? {
            return Err(ChatError::NotMember);
        }
        self.store.find_room(room_id)?.ok_or(ChatError::NotFound("room"))?;
        self.store.find_user(sender_id)?.ok_or(ChatError::NotFound("user"))?;

        let reply_to_id = reply_to_id.and_then(|id| match self.store.find_message(id) {
            Ok(Some(target)) => Some(target.id),
            Ok(None) => {
                debug!("reply target {} not found, sending without it", id);
                None
            }
            Err(e) => {
                warn!("reply target {} lookup failed, sending without it: {}", id, e);
                None
            }
        });

        let message = self.store.save_message(&NewMessage {
            room_id,
            sender_id,
            content,
            media_url: None,
            reply_to_id,
            created_at: Utc::now(),
        })?;
        Ok(message)
    }

    /// Record that `user_id` read a message: its status becomes READ and the
    /// member's room marker moves to the current time.
    ///
    /// The marker is "now", not the message's own timestamp, so acknowledging
    /// an older message after a newer one still clears everything up to now.
    pub fn mark_as_seen(&self, message_id: MessageId, user_id: UserId) -> Result<Message, ChatError> {
        let message = self
            .store
            .find_message(message_id)?
            .ok_or(ChatError::NotFound("message"))?;

        let now = Utc::now();
        self.store
            .upsert_message_status(message_id, user_id, MessageStatusKind::Read, now)?;
        if !self.store.set_last_read_at(message.room_id, user_id, now)? {
            debug!(
                "user {} acknowledged message {} outside their rooms",
                user_id, message_id
            );
        }
        Ok(message)
    }

    /// Set the caller's reaction on a message. Returns the stored reaction and
    /// the room the message lives in.
    pub fn add_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<(Reaction, RoomId), ChatError> {
        if emoji.trim().is_empty() {
            return Err(ChatError::Validation("emoji is empty".into()));
        }
        if char_len(emoji) > self.config.max_emoji_chars {
            return Err(ChatError::Validation(format!(
                "emoji exceeds {} characters",
                self.config.max_emoji_chars
            )));
        }

        let message = self
            .store
            .find_message(message_id)?
            .ok_or(ChatError::NotFound("message"))?;
        if !self.store.is_member(message.room_id, user_id)? {
            return Err(ChatError::NotMember);
        }

        let reaction = self
            .store
            .upsert_reaction(message_id, user_id, emoji.trim(), Utc::now())?;
        Ok((reaction, message.room_id))
    }

    /// A page of history, oldest first. Non-members get an empty page.
    pub fn load_history(
        &self,
        room_id: RoomId,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, ChatError> {
        if !self.store.is_member(room_id, user_id)? {
            return Ok(vec![]);
        }
        let limit = limit.clamp(1, self.config.max_history_page);
        Ok(self.store.messages_by_room(room_id, limit, offset)?)
    }

    pub fn last_message(&self, room_id: RoomId) -> Result<Option<Message>, ChatError> {
        Ok(self.store.last_message(room_id)?)
    }

    pub fn count_unread(&self, room_id: RoomId, user_id: UserId) -> Result<u64, ChatError> {
        let last_read_at = self.store.last_read_at(room_id, user_id)?;
        Ok(self.store.count_unread(room_id, user_id, last_read_at)?)
    }

    pub fn message_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<MessageStatusKind, ChatError> {
        Ok(self.store.message_status(message_id, user_id)?)
    }

    pub fn reactions(&self, message_id: MessageId) -> Result<Vec<Reaction>, ChatError> {
        Ok(self.store.reactions(message_id)?)
    }
}
