use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use huddle_types::api::Identity;
use huddle_types::events::{ClientFrame, ServerEvent};

use crate::chat::ChatService;
use crate::error::GatewayError;
use crate::fanout::RoomFanout;
use crate::presence::Presence;
use crate::registry::SessionRegistry;
use crate::rooms::RoomService;
use crate::store::{ChatStore, run_blocking};
use crate::users::UserService;

/// Limits and timings shared by the gateway and its services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Ping cadence; two unanswered pings drop the connection
    pub heartbeat_interval: Duration,
    /// Upper bound on stored (escaped) message content
    pub max_message_chars: usize,
    pub max_emoji_chars: usize,
    pub max_room_name_chars: usize,
    pub max_history_page: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            max_message_chars: 10_000,
            max_emoji_chars: 10,
            max_room_name_chars: 100,
            max_history_page: 200,
        }
    }
}

struct GatewayInner<S> {
    registry: SessionRegistry,
    chat: ChatService<S>,
    rooms: RoomService<S>,
    users: UserService<S>,
    presence: Presence<S>,
    fanout: RoomFanout<S>,
    config: GatewayConfig,
}

/// The real-time chat core: turns inbound frames into stored state and
/// room-scoped outbound events.
pub struct ChatGateway<S> {
    inner: Arc<GatewayInner<S>>,
}

impl<S> Clone for ChatGateway<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: ChatStore> ChatGateway<S> {
    pub fn new(store: Arc<S>, config: GatewayConfig) -> Self {
        let registry = SessionRegistry::new();
        Self {
            inner: Arc::new(GatewayInner {
                chat: ChatService::new(store.clone(), config),
                rooms: RoomService::new(store.clone(), config),
                users: UserService::new(store.clone()),
                presence: Presence::new(registry.clone(), store.clone()),
                fanout: RoomFanout::new(registry.clone(), store),
                registry,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn chat(&self) -> &ChatService<S> {
        &self.inner.chat
    }

    pub fn rooms(&self) -> &RoomService<S> {
        &self.inner.rooms
    }

    pub fn users(&self) -> &UserService<S> {
        &self.inner.users
    }

    pub fn presence(&self) -> &Presence<S> {
        &self.inner.presence
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Decode one text frame and act on it.
    pub async fn handle_text(&self, identity: &Identity, text: &str) -> Result<(), GatewayError> {
        let frame: ClientFrame = serde_json::from_str(text)?;
        self.handle_frame(identity, frame).await
    }

    /// Act on a decoded frame. An `Err` means nothing was stored and nothing
    /// was fanned out; the connection stays open either way.
    pub async fn handle_frame(&self, identity: &Identity, frame: ClientFrame) -> Result<(), GatewayError> {
        let sender = identity.user_id;
        trace!("{} sent {}", identity.username, frame.kind());
        match frame {
            ClientFrame::Message {
                room_id,
                content,
                reply_to_id,
            } => {
                let chat = self.inner.chat.clone();
                let message =
                    run_blocking(move || chat.send_message(room_id, sender, &content, reply_to_id))
                        .await??;
                let event = ServerEvent::message(&message, &identity.username);
                self.inner
                    .fanout
                    .broadcast_to_room(message.room_id, &event, Some(sender))
                    .await;
            }

            ClientFrame::Typing { room_id, is_typing } => {
                let event = ServerEvent::Typing {
                    room_id,
                    user_id: sender,
                    username: identity.username.clone(),
                    is_typing,
                };
                self.inner.fanout.broadcast_to_room(room_id, &event, None).await;
            }

            ClientFrame::Seen { message_id, .. } => {
                let chat = self.inner.chat.clone();
                let message = run_blocking(move || chat.mark_as_seen(message_id, sender)).await??;
                let event = ServerEvent::Seen {
                    message_id,
                    room_id: message.room_id,
                    user_id: sender,
                };
                self.inner
                    .fanout
                    .broadcast_to_room(message.room_id, &event, None)
                    .await;
            }

            ClientFrame::Reaction { message_id, emoji } => {
                let chat = self.inner.chat.clone();
                let (reaction, room_id) =
                    run_blocking(move || chat.add_reaction(message_id, sender, &emoji)).await??;
                let event = ServerEvent::Reaction {
                    message_id,
                    user_id: sender,
                    username: identity.username.clone(),
                    emoji: reaction.emoji,
                };
                self.inner.fanout.broadcast_to_room(room_id, &event, None).await;
            }

            ClientFrame::JoinRoom { room_id } => {
                debug!("{} is viewing room {}", identity.username, room_id);
            }

            ClientFrame::Unknown => {
                debug!("Ignoring frame of unknown type from {}", identity.username);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use huddle_db::{Database, StoreError, StoreResult};
    use huddle_types::models::{
        Message, MessageId, MessageStatusKind, NewMessage, Reaction, Room, RoomId, User, UserId,
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::error::ChatError;
    use crate::registry::{ConnectionHandle, Outbound};

    fn events(rx: &mut UnboundedReceiver<Outbound>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Outbound::Text(text) = msg {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    fn non_presence(rx: &mut UnboundedReceiver<Outbound>) -> Vec<serde_json::Value> {
        events(rx)
            .into_iter()
            .filter(|v| v["type"] != "USER_STATUS")
            .collect()
    }

    fn identity(user: &User) -> Identity {
        Identity {
            user_id: user.id,
            username: user.username.clone(),
        }
    }

    struct Connected {
        identity: Identity,
        rx: UnboundedReceiver<Outbound>,
    }

    async fn connect<S: ChatStore>(gateway: &ChatGateway<S>, user: &User) -> Connected {
        let (handle, rx) = ConnectionHandle::channel();
        let identity = identity(user);
        gateway.presence().connect(&identity, handle).await;
        Connected { identity, rx }
    }

    /// alice and bob in "team", carol outside it; everyone connected.
    async fn setup() -> (Arc<Database>, ChatGateway<Database>, RoomId, [Connected; 3]) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let now = Utc::now();
        let alice = db.create_user("alice", "a@example.com", now).unwrap();
        let bob = db.create_user("bob", "b@example.com", now).unwrap();
        let carol = db.create_user("carol", "c@example.com", now).unwrap();
        let room = db.create_group_room("team", alice.id, now).unwrap().id;
        db.add_member(room, bob.id, now).unwrap();

        let gateway = ChatGateway::new(db.clone(), GatewayConfig::default());
        let mut conns = [
            connect(&gateway, &alice).await,
            connect(&gateway, &bob).await,
            connect(&gateway, &carol).await,
        ];
        for c in conns.iter_mut() {
            events(&mut c.rx);
        }
        (db, gateway, room, conns)
    }

    #[tokio::test]
    async fn message_reaches_other_members_only() {
        let (db, gateway, room, [mut a, mut b, mut c]) = setup().await;
        let frame = format!(r#"{{"type":"MESSAGE","roomId":{room},"content":"hi <b>"}}"#);
        gateway.handle_text(&a.identity, &frame).await.unwrap();

        let got = non_presence(&mut b.rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "MESSAGE");
        assert_eq!(got[0]["roomId"], room);
        assert_eq!(got[0]["senderId"], a.identity.user_id);
        assert_eq!(got[0]["senderUsername"], "alice");
        assert_eq!(got[0]["content"], "hi &lt;b&gt;");
        assert!(got[0]["replyToId"].is_null());

        assert!(non_presence(&mut a.rx).is_empty());
        assert!(non_presence(&mut c.rx).is_empty());
        assert_eq!(db.get_messages(room, 10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reply_to_is_resolved_or_dropped() {
        let (_, gateway, room, [a, mut b, _]) = setup().await;
        gateway
            .handle_frame(
                &a.identity,
                ClientFrame::Message {
                    room_id: room,
                    content: "first".into(),
                    reply_to_id: None,
                },
            )
            .await
            .unwrap();
        let first = non_presence(&mut b.rx)[0]["id"].as_i64().unwrap();

        for (target, expected) in [(Some(first), Some(first)), (Some(9_999), None)] {
            gateway
                .handle_frame(
                    &a.identity,
                    ClientFrame::Message {
                        room_id: room,
                        content: "reply".into(),
                        reply_to_id: target,
                    },
                )
                .await
                .unwrap();
            let got = non_presence(&mut b.rx);
            assert_eq!(got[0]["replyToId"].as_i64(), expected);
        }
    }

    #[tokio::test]
    async fn non_member_message_is_rejected_without_fanout() {
        let (db, gateway, room, [mut a, mut b, c]) = setup().await;
        let frame = ClientFrame::Message {
            room_id: room,
            content: "let me in".into(),
            reply_to_id: None,
        };
        let err = gateway.handle_frame(&c.identity, frame).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(ChatError::NotMember)));
        assert!(non_presence(&mut a.rx).is_empty());
        assert!(non_presence(&mut b.rx).is_empty());
        assert!(db.get_messages(room, 10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn content_bounds_are_enforced() {
        let (_, gateway, room, [a, mut b, _]) = setup().await;
        let send = |content: String| ClientFrame::Message {
            room_id: room,
            content,
            reply_to_id: None,
        };
        for bad in ["   ".to_string(), "x".repeat(10_001), "<".repeat(2_501)] {
            let err = gateway.handle_frame(&a.identity, send(bad)).await.unwrap_err();
            assert!(matches!(err, GatewayError::Rejected(ChatError::Validation(_))));
        }
        assert!(non_presence(&mut b.rx).is_empty());

        gateway
            .handle_frame(&a.identity, send("x".repeat(10_000)))
            .await
            .unwrap();
        assert_eq!(non_presence(&mut b.rx).len(), 1);
    }

    #[tokio::test]
    async fn typing_goes_to_all_members_including_sender() {
        let (_, gateway, room, [mut a, mut b, mut c]) = setup().await;
        let frame = format!(r#"{{"type":"TYPING","roomId":{room},"isTyping":true}}"#);
        gateway.handle_text(&b.identity, &frame).await.unwrap();

        for rx in [&mut a.rx, &mut b.rx] {
            let got = non_presence(rx);
            assert_eq!(got.len(), 1);
            assert_eq!(got[0]["type"], "TYPING");
            assert_eq!(got[0]["userId"], b.identity.user_id);
            assert_eq!(got[0]["username"], "bob");
            assert_eq!(got[0]["isTyping"], true);
        }
        assert!(non_presence(&mut c.rx).is_empty());
    }

    #[tokio::test]
    async fn seen_in_dm_updates_status_and_notifies_room() {
        let (_, gateway, _, [mut a, mut b, mut c]) = setup().await;
        let dm = gateway
            .rooms()
            .create_or_get_dm(a.identity.user_id, b.identity.user_id)
            .unwrap();
        let msg = gateway
            .chat()
            .send_message(dm.id, a.identity.user_id, "psst", None)
            .unwrap();
        assert_eq!(gateway.chat().count_unread(dm.id, b.identity.user_id).unwrap(), 1);

        // The client-supplied room is ignored in favour of the message's own.
        let frame = format!(r#"{{"type":"SEEN","messageId":{},"roomId":424242}}"#, msg.id);
        gateway.handle_text(&b.identity, &frame).await.unwrap();

        for rx in [&mut a.rx, &mut b.rx] {
            let got = non_presence(rx);
            assert_eq!(got.len(), 1);
            assert_eq!(got[0]["type"], "SEEN");
            assert_eq!(got[0]["messageId"], msg.id);
            assert_eq!(got[0]["roomId"], dm.id);
            assert_eq!(got[0]["userId"], b.identity.user_id);
        }
        assert!(non_presence(&mut c.rx).is_empty());
        assert_eq!(
            gateway.chat().message_status(msg.id, b.identity.user_id).unwrap(),
            MessageStatusKind::Read
        );
        assert_eq!(gateway.chat().count_unread(dm.id, b.identity.user_id).unwrap(), 0);
    }

    #[tokio::test]
    async fn seen_for_missing_message_is_rejected() {
        let (_, gateway, _, [a, mut b, _]) = setup().await;
        let err = gateway
            .handle_frame(
                &a.identity,
                ClientFrame::Seen {
                    message_id: 777,
                    room_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(ChatError::NotFound("message"))));
        assert!(non_presence(&mut b.rx).is_empty());
    }

    #[tokio::test]
    async fn reaction_defaults_and_replaces() {
        let (db, gateway, room, [a, mut b, mut c]) = setup().await;
        let msg = gateway
            .chat()
            .send_message(room, a.identity.user_id, "ship it", None)
            .unwrap();

        let frame = format!(r#"{{"type":"REACTION","messageId":{}}}"#, msg.id);
        gateway.handle_text(&b.identity, &frame).await.unwrap();
        let frame = format!(r#"{{"type":"REACTION","messageId":{},"emoji":"🎉"}}"#, msg.id);
        gateway.handle_text(&b.identity, &frame).await.unwrap();

        let got = non_presence(&mut b.rx);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0]["emoji"], "👍");
        assert_eq!(got[1]["emoji"], "🎉");
        assert_eq!(got[1]["username"], "bob");
        assert!(non_presence(&mut c.rx).is_empty());

        let stored = db.get_reactions(msg.id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].emoji, "🎉");

        let long = ClientFrame::Reaction {
            message_id: msg.id,
            emoji: "x".repeat(11),
        };
        assert!(matches!(
            gateway.handle_frame(&b.identity, long).await,
            Err(GatewayError::Rejected(ChatError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_have_no_effect() {
        let (_, gateway, _, [a, mut b, _]) = setup().await;
        assert!(matches!(
            gateway.handle_text(&a.identity, "{not json").await,
            Err(GatewayError::MalformedFrame(_))
        ));
        assert!(matches!(
            gateway.handle_text(&a.identity, r#"{"type":"MESSAGE"}"#).await,
            Err(GatewayError::MalformedFrame(_))
        ));
        gateway
            .handle_text(&a.identity, r#"{"type":"DANCE","roomId":1}"#)
            .await
            .unwrap();
        gateway
            .handle_text(&a.identity, r#"{"type":"JOIN_ROOM","roomId":1}"#)
            .await
            .unwrap();
        assert!(non_presence(&mut b.rx).is_empty());
    }

    /// Delegates to a real database but refuses to store messages.
    struct FlakyStore(Database);

    impl ChatStore for FlakyStore {
        fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
            self.0.find_user(id)
        }
        fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
            self.0.find_user_by_username(username)
        }
        fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
            self.0.find_user_by_email(email)
        }
        fn search_users(&self, query: &str, limit: u32) -> StoreResult<Vec<User>> {
            ChatStore::search_users(&self.0, query, limit)
        }
        fn set_online(&self, id: UserId, online: bool, now: DateTime<Utc>) -> StoreResult<()> {
            ChatStore::set_online(&self.0, id, online, now)
        }
        fn update_avatar(&self, id: UserId, avatar: Option<&str>) -> StoreResult<()> {
            ChatStore::update_avatar(&self.0, id, avatar)
        }
        fn find_room(&self, id: RoomId) -> StoreResult<Option<Room>> {
            self.0.find_room(id)
        }
        fn create_group_room(&self, name: &str, creator: UserId, now: DateTime<Utc>) -> StoreResult<Room> {
            ChatStore::create_group_room(&self.0, name, creator, now)
        }
        fn find_or_create_dm(
            &self,
            a: UserId,
            b: UserId,
            name: &str,
            now: DateTime<Utc>,
        ) -> StoreResult<(Room, bool)> {
            ChatStore::find_or_create_dm(&self.0, a, b, name, now)
        }
        fn rooms_for_user(&self, user_id: UserId) -> StoreResult<Vec<Room>> {
            self.0.rooms_for_user(user_id)
        }
        fn is_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool> {
            ChatStore::is_member(&self.0, room_id, user_id)
        }
        fn members(&self, room_id: RoomId) -> StoreResult<Vec<User>> {
            self.0.members(room_id)
        }
        fn add_member(&self, room_id: RoomId, user_id: UserId, now: DateTime<Utc>) -> StoreResult<bool> {
            ChatStore::add_member(&self.0, room_id, user_id, now)
        }
        fn remove_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool> {
            ChatStore::remove_member(&self.0, room_id, user_id)
        }
        fn last_read_at(&self, room_id: RoomId, user_id: UserId) -> StoreResult<Option<DateTime<Utc>>> {
            self.0.last_read_at(room_id, user_id)
        }
        fn set_last_read_at(&self, room_id: RoomId, user_id: UserId, at: DateTime<Utc>) -> StoreResult<bool> {
            ChatStore::set_last_read_at(&self.0, room_id, user_id, at)
        }
        fn find_message(&self, id: MessageId) -> StoreResult<Option<Message>> {
            self.0.find_message(id)
        }
        fn save_message(&self, _msg: &NewMessage) -> StoreResult<Message> {
            Err(StoreError::LockPoisoned)
        }
        fn messages_by_room(&self, room_id: RoomId, limit: u32, offset: u32) -> StoreResult<Vec<Message>> {
            self.0.messages_by_room(room_id, limit, offset)
        }
        fn last_message(&self, room_id: RoomId) -> StoreResult<Option<Message>> {
            self.0.last_message(room_id)
        }
        fn count_unread(
            &self,
            room_id: RoomId,
            user_id: UserId,
            last_read_at: Option<DateTime<Utc>>,
        ) -> StoreResult<u64> {
            ChatStore::count_unread(&self.0, room_id, user_id, last_read_at)
        }
        fn upsert_message_status(
            &self,
            message_id: MessageId,
            user_id: UserId,
            status: MessageStatusKind,
            now: DateTime<Utc>,
        ) -> StoreResult<()> {
            ChatStore::upsert_message_status(&self.0, message_id, user_id, status, now)
        }
        fn message_status(&self, message_id: MessageId, user_id: UserId) -> StoreResult<MessageStatusKind> {
            self.0.message_status(message_id, user_id)
        }
        fn upsert_reaction(
            &self,
            message_id: MessageId,
            user_id: UserId,
            emoji: &str,
            now: DateTime<Utc>,
        ) -> StoreResult<Reaction> {
            ChatStore::upsert_reaction(&self.0, message_id, user_id, emoji, now)
        }
        fn reactions(&self, message_id: MessageId) -> StoreResult<Vec<Reaction>> {
            self.0.reactions(message_id)
        }
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_persistence_without_fanout() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let alice = db.create_user("alice", "a@example.com", now).unwrap();
        let bob = db.create_user("bob", "b@example.com", now).unwrap();
        let room = db.create_group_room("team", alice.id, now).unwrap().id;
        db.add_member(room, bob.id, now).unwrap();

        let gateway = ChatGateway::new(Arc::new(FlakyStore(db)), GatewayConfig::default());
        let a = connect(&gateway, &alice).await;
        let mut b = connect(&gateway, &bob).await;
        events(&mut b.rx);

        let frame = format!(r#"{{"type":"MESSAGE","roomId":{room},"content":"lost"}}"#);
        let err = gateway.handle_text(&a.identity, &frame).await.unwrap_err();
        assert!(matches!(err, GatewayError::Persistence(StoreError::LockPoisoned)));
        assert!(non_presence(&mut b.rx).is_empty());

        // The gateway keeps serving other frames afterwards.
        let frame = format!(r#"{{"type":"TYPING","roomId":{room},"isTyping":false}}"#);
        gateway.handle_text(&a.identity, &frame).await.unwrap();
        assert_eq!(non_presence(&mut b.rx).len(), 1);
    }
}
