//! Room-scoped delivery of server events.
//!
//! Membership comes from the store, live connections from a registry
//! snapshot. Each recipient is handed the frame independently; a closed or
//! failing recipient is skipped and never surfaces as an error.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, trace, warn};

use huddle_types::events::ServerEvent;
use huddle_types::models::{RoomId, UserId};

use crate::error::GatewayError;
use crate::registry::{ConnectionHandle, SessionRegistry};
use crate::store::{ChatStore, run_blocking};

/// Serialize once and hand the same frame to every target. Returns how many
/// connections accepted it.
pub(crate) fn deliver<'a>(
    event: &ServerEvent,
    targets: impl IntoIterator<Item = (UserId, &'a ConnectionHandle)>,
) -> usize {
    let text: Arc<str> = match serde_json::to_string(event) {
        Ok(json) => json.into(),
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return 0;
        }
    };

    let mut delivered = 0;
    for (user_id, handle) in targets {
        if !handle.is_open() {
            continue;
        }
        match handle.send_text(text.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => trace!("Dropped frame for user {}: connection closed", user_id),
        }
    }
    delivered
}

pub struct RoomFanout<S> {
    registry: SessionRegistry,
    store: Arc<S>,
}

impl<S> Clone for RoomFanout<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            store: self.store.clone(),
        }
    }
}

impl<S: ChatStore> RoomFanout<S> {
    pub fn new(registry: SessionRegistry, store: Arc<S>) -> Self {
        Self { registry, store }
    }

    /// Deliver `event` to every connected member of the room except
    /// `exclude`. Returns the number of connections reached; failures only
    /// lower that number.
    pub async fn broadcast_to_room(
        &self,
        room_id: RoomId,
        event: &ServerEvent,
        exclude: Option<UserId>,
    ) -> usize {
        let store = self.store.clone();
        let members = match run_blocking(move || store.members(room_id))
            .await
            .and_then(|r| r.map_err(GatewayError::from))
        {
            Ok(members) => members,
            Err(e) => {
                warn!("Room {} members lookup failed, event dropped: {}", room_id, e);
                return 0;
            }
        };
        let member_ids: HashSet<UserId> = members.iter().map(|u| u.id).collect();

        let snapshot = self.registry.snapshot().await;
        let targets = snapshot
            .iter()
            .filter(|(uid, _)| member_ids.contains(uid) && Some(*uid) != exclude)
            .map(|(uid, handle)| (*uid, handle));

        let delivered = deliver(event, targets);
        trace!("Room {} event reached {} connection(s)", room_id, delivered);
        delivered
    }
}
