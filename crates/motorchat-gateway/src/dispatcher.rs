use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use motorchat_db::MessageStore;
use motorchat_types::RoomId;
use motorchat_types::events::{
    ClientCommand, ConversationPayload, MarkReadPayload, ReadyPayload, ServerEvent, TypingPayload,
};
use motorchat_types::models::PresenceRecord;

use crate::GatewayConfig;
use crate::auth::{AuthError, Authenticator, Identity};
use crate::delivery::{AckResponder, DeliveryPipeline};
use crate::error::ProtocolError;
use crate::presence::PresenceTracker;
use crate::rooms::RoomRegistry;
use crate::session::Session;
use crate::typing::TypingTracker;

/// Owns every live session and routes their commands.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: GatewayConfig,
    authenticator: Arc<dyn Authenticator>,

    /// Live sessions: session_id -> session
    sessions: DashMap<Uuid, Arc<Session>>,

    rooms: Arc<RoomRegistry>,
    presence: PresenceTracker,
    typing: TypingTracker,
    delivery: DeliveryPipeline,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn MessageStore>, authenticator: Arc<dyn Authenticator>, config: GatewayConfig) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                authenticator,
                sessions: DashMap::new(),
                delivery: DeliveryPipeline::new(store, rooms.clone()),
                rooms,
                presence: PresenceTracker::new(),
                typing: TypingTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        self.inner.delivery.store()
    }

    pub fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        self.inner.authenticator.authenticate(token)
    }

    /// Validate `token` and open a session for it.
    pub fn connect(&self, token: &str) -> Result<(Arc<Session>, mpsc::Receiver<ServerEvent>), AuthError> {
        let identity = self.authenticate(token)?;
        Ok(self.open_session(identity))
    }

    /// Register a session for an already authenticated user and greet it
    /// with `ready`.
    pub fn open_session(&self, identity: Identity) -> (Arc<Session>, mpsc::Receiver<ServerEvent>) {
        let (session, rx) = Session::new(identity.user_id, self.inner.config.outbound_capacity);
        self.inner.sessions.insert(session.id, session.clone());

        session.send(ServerEvent::Ready(ReadyPayload {
            session_id: session.id,
            user_id: session.user_id,
        }));

        if let Some(record) = self.inner.presence.session_opened(identity.user_id) {
            self.broadcast_presence(record);
        }

        info!("Session {} opened for user {}", session.id, session.user_id);
        (session, rx)
    }

    /// Tear a session down. Safe to call any number of times; only the first
    /// call has an effect.
    pub fn disconnect(&self, session_id: Uuid) {
        let Some((_, session)) = self.inner.sessions.remove(&session_id) else {
            return;
        };
        session.mark_closed();

        for room in self.inner.rooms.leave_all(&session) {
            if self.inner.typing.stop(&room, session.user_id) {
                self.inner.rooms.broadcast(&room, &typing_stop(&room, session.user_id), None);
            }
        }

        if let Some(record) = self.inner.presence.session_closed(session.user_id) {
            self.broadcast_presence(record);
        }

        info!("Session {} closed for user {}", session.id, session.user_id);
    }

    pub fn session(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.inner.sessions.get(&session_id).map(|s| s.clone())
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn presence(&self, user_id: Uuid) -> PresenceRecord {
        self.inner.presence.status(user_id)
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.inner.rooms
    }

    /// Handle one command from `session`. Failures are reported back to the
    /// session; nothing here tears the connection down.
    pub async fn dispatch(&self, session: &Arc<Session>, command: ClientCommand) {
        let name = command.name();
        let result = match command {
            ClientCommand::MessageSend(payload) => {
                let ack = AckResponder::new(session.clone(), payload.temp_id);
                if let Ok(message) = self.inner.delivery.submit_send(session, payload, ack).await {
                    self.clear_typing(&message.conversation_id(), session.user_id, None);
                }
                Ok(())
            }
            ClientCommand::MarkRead(payload) => self.mark_read(session, payload).await,
            ClientCommand::ConversationJoin(payload) => self.join(session, payload).await,
            ClientCommand::ConversationLeave(payload) => self.leave(session, payload),
            ClientCommand::TypingStart(payload) => self.typing_start(session, payload),
            ClientCommand::TypingStop(payload) => self.typing_stop(session, payload),
        };

        if let Err(e) = result {
            self.report_error(session, &e, Some(name));
        }
    }

    /// Send an `error` event to one session.
    pub fn report_error(&self, session: &Session, error: &ProtocolError, event: Option<&str>) {
        match error {
            ProtocolError::Store(_) => warn!("{} from session {}: {}", event.unwrap_or("command"), session.id, error),
            _ => debug!("{} from session {}: {}", event.unwrap_or("command"), session.id, error),
        }
        session.send(error.to_event(event));
    }

    /// Queue an event for every live session.
    pub fn broadcast_all(&self, event: &ServerEvent) {
        let sessions: Vec<Arc<Session>> = self.inner.sessions.iter().map(|s| s.value().clone()).collect();
        for session in sessions {
            session.send(event.clone());
        }
    }

    /// Periodically evict offline presence older than the retention window.
    /// The task ends once the dispatcher is dropped.
    pub fn spawn_presence_sweeper(&self) -> JoinHandle<()> {
        let inner: Weak<DispatcherInner> = Arc::downgrade(&self.inner);
        let retention = self.inner.config.presence_retention;
        let keep = chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(1));
        let period = (retention / 4).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let removed = inner.presence.prune_offline(chrono::Utc::now() - keep);
                if removed > 0 {
                    debug!("Forgot presence for {} offline users", removed);
                }
            }
        })
    }

    fn broadcast_presence(&self, record: PresenceRecord) {
        debug!("User {} is now {:?}", record.user_id, record.status);
        self.broadcast_all(&ServerEvent::Presence(record.into()));
    }

    /// The authoritative room for a conversation between the session's user
    /// and `other_user_id`.
    fn resolve_room(
        &self,
        session: &Session,
        given: Option<&RoomId>,
        other_user_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<RoomId, ProtocolError> {
        if other_user_id == session.user_id {
            return Err(ProtocolError::InvalidConversation);
        }
        let room = RoomId::for_participants(session.user_id, other_user_id, listing_id);
        match given {
            Some(given) if *given != room => Err(ProtocolError::ConversationMismatch {
                given: given.clone(),
                expected: room,
            }),
            _ => Ok(room),
        }
    }

    async fn join(&self, session: &Arc<Session>, payload: ConversationPayload) -> Result<(), ProtocolError> {
        let room = self.resolve_room(
            session,
            payload.conversation_id.as_ref(),
            payload.other_user_id,
            payload.listing_id,
        )?;

        if !session.is_live() {
            return Ok(());
        }
        self.inner.rooms.join(&room, session);
        // Lost a race with disconnect; undo so the room holds no dead session.
        if !session.is_live() {
            self.inner.rooms.leave(&room, session);
            return Ok(());
        }
        debug!("Session {} joined {}", session.id, room);

        session.send(ServerEvent::Presence(
            self.inner.presence.status(payload.other_user_id).into(),
        ));

        self.inner
            .delivery
            .mark_delivered_on_join(session, &room, payload.other_user_id, payload.listing_id)
            .await?;
        Ok(())
    }

    fn leave(&self, session: &Session, payload: ConversationPayload) -> Result<(), ProtocolError> {
        let room = self.resolve_room(
            session,
            payload.conversation_id.as_ref(),
            payload.other_user_id,
            payload.listing_id,
        )?;

        if self.inner.rooms.leave(&room, session) {
            debug!("Session {} left {}", session.id, room);
            self.clear_typing(&room, session.user_id, Some(session.id));
        }
        Ok(())
    }

    async fn mark_read(&self, session: &Session, payload: MarkReadPayload) -> Result<(), ProtocolError> {
        let room = self.resolve_room(
            session,
            payload.conversation_id.as_ref(),
            payload.sender_id,
            payload.listing_id,
        )?;

        self.inner
            .delivery
            .mark_conversation_read(session, &room, payload.sender_id, payload.listing_id)
            .await?;
        Ok(())
    }

    fn typing_start(&self, session: &Session, payload: TypingPayload) -> Result<(), ProtocolError> {
        let room = payload.conversation_id;
        if !session.has_joined(&room) {
            return Err(ProtocolError::NotJoined(room));
        }

        let (newly, generation) = self.inner.typing.start(&room, session.user_id);
        if newly {
            self.inner.rooms.broadcast(
                &room,
                &ServerEvent::TypingStart(TypingPayload {
                    conversation_id: room.clone(),
                    user_id: Some(session.user_id),
                }),
                Some(session.id),
            );
        }
        self.schedule_typing_expiry(room, session.user_id, generation);
        Ok(())
    }

    fn typing_stop(&self, session: &Session, payload: TypingPayload) -> Result<(), ProtocolError> {
        let room = payload.conversation_id;
        if !session.has_joined(&room) {
            return Err(ProtocolError::NotJoined(room));
        }
        self.clear_typing(&room, session.user_id, Some(session.id));
        Ok(())
    }

    /// Clear the user's indicator and relay `typing:stop` if it was active.
    fn clear_typing(&self, room: &RoomId, user_id: Uuid, exclude: Option<Uuid>) {
        if self.inner.typing.stop(room, user_id) {
            self.inner.rooms.broadcast(room, &typing_stop(room, user_id), exclude);
        }
    }

    fn schedule_typing_expiry(&self, room: RoomId, user_id: Uuid, generation: u64) {
        let inner: Weak<DispatcherInner> = Arc::downgrade(&self.inner);
        let ttl = self.inner.config.typing_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.typing.expire(&room, user_id, generation) {
                debug!("Typing indicator for {} in {} expired", user_id, room);
                inner.rooms.broadcast(&room, &typing_stop(&room, user_id), None);
            }
        });
    }
}

fn typing_stop(room: &RoomId, user_id: Uuid) -> ServerEvent {
    ServerEvent::TypingStop(TypingPayload {
        conversation_id: room.clone(),
        user_id: Some(user_id),
    })
}
