use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageId, RoomId, UserId};

fn default_emoji() -> String {
    "👍".to_string()
}

/// Frames sent FROM client TO server, one JSON object per WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Post a message to a room
    Message {
        room_id: RoomId,
        #[serde(default)]
        content: String,
        #[serde(default)]
        reply_to_id: Option<MessageId>,
    },

    /// Typing indicator; never persisted
    Typing {
        room_id: RoomId,
        #[serde(default)]
        is_typing: bool,
    },

    /// Read receipt for a message. The room is derived from the message itself.
    Seen {
        message_id: MessageId,
        #[serde(default)]
        room_id: Option<RoomId>,
    },

    /// Set (or replace) the caller's reaction on a message
    Reaction {
        message_id: MessageId,
        #[serde(default = "default_emoji")]
        emoji: String,
    },

    /// Client is viewing a room. Reserved for room-scoped presence.
    JoinRoom { room_id: RoomId },

    /// Any `type` this server does not know about.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "MESSAGE",
            Self::Typing { .. } => "TYPING",
            Self::Seen { .. } => "SEEN",
            Self::Reaction { .. } => "REACTION",
            Self::JoinRoom { .. } => "JOIN_ROOM",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Events sent FROM server TO clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// A new message was stored in a room
    Message {
        id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        sender_username: String,
        content: String,
        media_url: Option<String>,
        reply_to_id: Option<MessageId>,
        created_at: DateTime<Utc>,
    },

    /// A room member started or stopped typing
    Typing {
        room_id: RoomId,
        user_id: UserId,
        username: String,
        is_typing: bool,
    },

    /// A member acknowledged a message
    Seen {
        message_id: MessageId,
        room_id: RoomId,
        user_id: UserId,
    },

    /// A member set their reaction on a message
    Reaction {
        message_id: MessageId,
        user_id: UserId,
        username: String,
        emoji: String,
    },

    /// A user came online or went offline
    UserStatus {
        user_id: UserId,
        username: String,
        is_online: bool,
    },
}

impl ServerEvent {
    pub fn message(message: &Message, sender_username: &str) -> Self {
        Self::Message {
            id: message.id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            sender_username: sender_username.to_string(),
            content: message.content.clone(),
            media_url: message.media_url.clone(),
            reply_to_id: message.reply_to_id,
            created_at: message.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_message_frame_with_null_reply() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"MESSAGE","roomId":5,"content":"hi","replyToId":null}"#)
                .unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message {
                room_id: 5,
                content: "hi".into(),
                reply_to_id: None,
            }
        );
    }

    #[test]
    fn unknown_type_decodes_to_unknown() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"WAVE","roomId":5}"#).unwrap();
        assert_eq!(frame, ClientFrame::Unknown);
    }

    #[test]
    fn reaction_without_emoji_defaults_to_thumbs_up() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"REACTION","messageId":42}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Reaction {
                message_id: 42,
                emoji: "👍".into(),
            }
        );
    }

    #[test]
    fn seen_room_is_optional() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"SEEN","messageId":42}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Seen {
                message_id: 42,
                room_id: None,
            }
        );
    }

    #[test]
    fn frame_missing_required_field_is_an_error() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"MESSAGE","content":"hi"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>("not json").is_err());
    }

    #[test]
    fn join_room_uses_screaming_snake_tag() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"JOIN_ROOM","roomId":9}"#).unwrap();
        assert_eq!(frame, ClientFrame::JoinRoom { room_id: 9 });
        assert_eq!(frame.kind(), "JOIN_ROOM");
    }

    #[test]
    fn user_status_wire_shape() {
        let event = ServerEvent::UserStatus {
            user_id: 3,
            username: "alice".into(),
            is_online: true,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "USER_STATUS");
        assert_eq!(json["userId"], 3);
        assert_eq!(json["isOnline"], true);
    }

    #[test]
    fn message_event_carries_sender() {
        let message = Message {
            id: 42,
            room_id: 5,
            sender_id: 3,
            content: "hi".into(),
            media_url: None,
            reply_to_id: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(ServerEvent::message(&message, "alice")).unwrap();
        assert_eq!(json["type"], "MESSAGE");
        assert_eq!(json["senderId"], 3);
        assert_eq!(json["senderUsername"], "alice");
        assert_eq!(json["roomId"], 5);
        assert!(json["replyToId"].is_null());
    }
}
