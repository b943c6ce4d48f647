use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type RoomId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomKind {
    Group,
    Dm,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "GROUP",
            Self::Dm => "DM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GROUP" => Some(Self::Group),
            "DM" => Some(Self::Dm),
            _ => None,
        }
    }
}

/// A room never changes after creation; only its member set does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub kind: RoomKind,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    /// `None` until the member acknowledges a message in the room.
    pub last_read_at: Option<DateTime<Utc>>,
}

/// Messages are immutable once stored.
///
/// `reply_to_id` is a plain lookup key into the same table. The target may
/// have been removed since, so resolving it can come back empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub media_url: Option<String>,
    pub reply_to_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`Message`]; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub media_url: Option<String>,
    pub reply_to_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

/// Per-recipient delivery state of a message.
///
/// `Sent` is what a missing row means. `Delivered` has no producer yet; it is
/// reserved for a transport-level acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatusKind {
    Sent,
    Delivered,
    Read,
}

impl MessageStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(Self::Sent),
            "DELIVERED" => Some(Self::Delivered),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatus {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub status: MessageStatusKind,
    pub updated_at: DateTime<Utc>,
}

/// One per (message, user); a second reaction replaces the emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: i64,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}
