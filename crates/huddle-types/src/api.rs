use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{RoomId, RoomKind, UserId};

// -- Identity --

/// Token claims checked by the server at the WebSocket handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

/// A verified `(user id, username)` pair attached to a connection before it
/// reaches the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
        }
    }
}

// -- Rooms --

/// A room as shown in a member's room list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub kind: RoomKind,
    pub unread_count: u64,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}
