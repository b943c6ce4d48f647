use std::sync::Arc;

use tracing::{debug, info, warn};

use huddle_types::api::Identity;
use huddle_types::events::ServerEvent;
use huddle_types::models::UserId;

use crate::error::GatewayError;
use crate::fanout::deliver;
use crate::registry::{ConnectionHandle, SessionRegistry};
use crate::store::{ChatStore, run_blocking};
use crate::users::UserService;

pub const REPLACED_CLOSE_CODE: u16 = 1000;
pub const REPLACED_CLOSE_REASON: &str = "Replaced by a newer connection";

/// Online/offline bookkeeping tied to connection admission and teardown.
pub struct Presence<S> {
    registry: SessionRegistry,
    store: Arc<S>,
    users: UserService<S>,
}

impl<S> Clone for Presence<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            store: self.store.clone(),
            users: self.users.clone(),
        }
    }
}

impl<S: ChatStore> Presence<S> {
    pub fn new(registry: SessionRegistry, store: Arc<S>) -> Self {
        Self {
            registry,
            users: UserService::new(store.clone()),
            store,
        }
    }

    /// Admit a connection for `identity`.
    ///
    /// The new connection first receives who is already online, then it
    /// replaces any earlier connection of the same user, and finally every
    /// connection (its own included) hears that the user is online.
    pub async fn connect(&self, identity: &Identity, handle: ConnectionHandle) {
        let roster = self.registry.snapshot().await;
        for (user_id, _) in roster.iter().filter(|(uid, _)| *uid != identity.user_id) {
            let username = match self.username_of(*user_id).await {
                Some(name) => name,
                None => continue,
            };
            let event = ServerEvent::UserStatus {
                user_id: *user_id,
                username,
                is_online: true,
            };
            deliver(&event, [(identity.user_id, &handle)]);
        }

        if let Some(displaced) = self.registry.register(identity.user_id, handle).await {
            debug!("User {} reconnected, closing previous connection", identity.user_id);
            displaced.close(REPLACED_CLOSE_CODE, REPLACED_CLOSE_REASON);
        }

        self.persist(identity, true).await;
        self.announce(identity, true).await;
        info!("{} connected", identity.username);
    }

    /// Tear down `handle`. Only the user's current connection flips them
    /// offline; a connection that was already replaced leaves no trace.
    /// Returns whether the user went offline.
    pub async fn disconnect(&self, identity: &Identity, handle: &ConnectionHandle) -> bool {
        if !self.registry.unregister(identity.user_id, handle).await {
            debug!(
                "Stale connection {} of user {} closed, presence unchanged",
                handle.id(),
                identity.user_id
            );
            return false;
        }
        if !self.mark_offline(identity).await {
            return false;
        }
        info!("{} disconnected", identity.username);
        true
    }

    /// Record and announce the user going offline, unless a newer connection
    /// registered after this one was removed.
    async fn mark_offline(&self, identity: &Identity) -> bool {
        if self.superseded(identity).await {
            debug!("User {} reconnected during teardown, staying online", identity.user_id);
            return false;
        }
        self.persist(identity, false).await;
        if self.superseded(identity).await {
            // The newer connection's online write may have landed first.
            self.persist(identity, true).await;
            debug!("User {} reconnected during teardown, staying online", identity.user_id);
            return false;
        }
        self.announce(identity, false).await;
        true
    }

    async fn superseded(&self, identity: &Identity) -> bool {
        self.registry.lookup(identity.user_id).await.is_some()
    }

    async fn persist(&self, identity: &Identity, online: bool) {
        let users = self.users.clone();
        let user_id = identity.user_id;
        let result = run_blocking(move || users.set_online(user_id, online))
            .await
            .and_then(|r| r.map_err(GatewayError::from));
        if let Err(e) = result {
            warn!("Failed to record presence for user {}: {}", user_id, e);
        }
    }

    async fn announce(&self, identity: &Identity, is_online: bool) {
        let event = ServerEvent::UserStatus {
            user_id: identity.user_id,
            username: identity.username.clone(),
            is_online,
        };
        let snapshot = self.registry.snapshot().await;
        deliver(&event, snapshot.iter().map(|(uid, h)| (*uid, h)));
    }

    async fn username_of(&self, user_id: UserId) -> Option<String> {
        let store = self.store.clone();
        match run_blocking(move || store.find_user(user_id)).await {
            Ok(Ok(user)) => user.map(|u| u.username),
            Ok(Err(e)) => {
                warn!("Roster lookup for user {} failed: {}", user_id, e);
                None
            }
            Err(_) => None,
        }
    }
}
