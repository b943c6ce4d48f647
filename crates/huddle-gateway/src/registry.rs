use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use huddle_types::models::UserId;

/// What a connection's writer task is asked to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized server event
    Text(Arc<str>),
    /// Send a close frame and stop
    Close { code: u16, reason: &'static str },
}

/// The receiving half was dropped: the connection is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionClosed;

/// Sending side of one live connection.
///
/// Sends never block: frames are queued for the connection's own writer task,
/// so a slow socket only delays itself. Two handles are the same connection
/// only if their ids match.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// A fresh handle and the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send_text(&self, text: Arc<str>) -> Result<(), ConnectionClosed> {
        self.tx.send(Outbound::Text(text)).map_err(|_| ConnectionClosed)
    }

    /// Ask the writer to close the socket. A no-op if it is already gone.
    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.send(Outbound::Close { code, reason });
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// Live connections keyed by user. Only the most recent connection of a user
/// is tracked.
///
/// The lock is held for map operations only; nothing is sent while holding it.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle` as the user's connection, returning the one it displaced.
    pub async fn register(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.sessions.write().await.insert(user_id, handle.clone());
        previous.filter(|p| *p != handle)
    }

    /// Remove the entry, but only if it is still `handle`. A late teardown of a
    /// replaced connection leaves the newer one alone. Returns whether an entry
    /// was removed.
    pub async fn unregister(&self, user_id: UserId, handle: &ConnectionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.get(&user_id).is_some_and(|stored| stored == handle) {
            sessions.remove(&user_id);
            return true;
        }
        false
    }

    pub async fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.sessions.read().await.get(&user_id).cloned()
    }

    /// Point-in-time copy ordered by user id, for iterating without the lock.
    pub async fn snapshot(&self) -> Vec<(UserId, ConnectionHandle)> {
        let mut entries: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_returns_displaced_handle() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = ConnectionHandle::channel();
        let (second, _rx2) = ConnectionHandle::channel();

        assert!(registry.register(1, first.clone()).await.is_none());
        let displaced = registry.register(1, second.clone()).await;
        assert_eq!(displaced, Some(first));
        assert_eq!(registry.lookup(1).await, Some(second));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn reregistering_same_handle_displaces_nothing() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel();
        registry.register(1, handle.clone()).await;
        assert!(registry.register(1, handle).await.is_none());
    }

    #[tokio::test]
    async fn stale_unregister_keeps_newer_session() {
        let registry = SessionRegistry::new();
        let (old, _rx1) = ConnectionHandle::channel();
        let (new, _rx2) = ConnectionHandle::channel();
        registry.register(7, old.clone()).await;
        registry.register(7, new.clone()).await;

        assert!(!registry.unregister(7, &old).await);
        assert_eq!(registry.lookup(7).await, Some(new.clone()));

        assert!(registry.unregister(7, &new).await);
        assert!(registry.lookup(7).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn snapshot_is_ordered_copy() {
        let registry = SessionRegistry::new();
        let mut receivers = Vec::new();
        for id in [9, 3, 5] {
            let (h, rx) = ConnectionHandle::channel();
            receivers.push(rx);
            registry.register(id, h).await;
        }
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![3, 5, 9]);

        // Mutating after the snapshot does not affect it.
        let (_, h) = &snapshot[0];
        registry.unregister(3, h).await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn handle_reports_closed_after_receiver_drops() {
        let (handle, rx) = ConnectionHandle::channel();
        assert!(handle.is_open());
        handle.send_text("hi".into()).unwrap();
        drop(rx);
        assert!(!handle.is_open());
        assert_eq!(handle.send_text("hi".into()), Err(ConnectionClosed));
        handle.close(1000, "bye");
    }

    #[tokio::test]
    async fn concurrent_registrations_are_all_tracked() {
        let registry = SessionRegistry::new();
        let tasks: Vec<_> = (0..64)
            .map(|id| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let (h, rx) = ConnectionHandle::channel();
                    registry.register(id, h).await;
                    rx
                })
            })
            .collect();
        let mut receivers = Vec::new();
        for t in tasks {
            receivers.push(t.await.unwrap());
        }
        assert_eq!(registry.len().await, 64);
    }
}
