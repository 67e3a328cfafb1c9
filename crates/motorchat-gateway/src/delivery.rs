use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use motorchat_db::{MessageStore, StoreError};
use motorchat_types::RoomId;
use motorchat_types::events::{MessageReceived, MessagesRead, SendAck, SendMessagePayload, ServerEvent, StatusUpdate};
use motorchat_types::models::{DeliveryStatus, MAX_BODY_CHARS, Message, NewMessage};

use crate::error::SendError;
use crate::rooms::RoomRegistry;
use crate::session::Session;

/// Answers one `message:send`. Consumed by `respond`, so a send is
/// acknowledged exactly once. The ack waits for queue space rather than being
/// dropped, so a persisted send is never reported to its client as lost.
pub struct AckResponder {
    session: Arc<Session>,
    temp_id: Option<Uuid>,
}

impl AckResponder {
    pub fn new(session: Arc<Session>, temp_id: Option<Uuid>) -> Self {
        Self { session, temp_id }
    }

    pub async fn respond(self, result: &Result<Message, SendError>) {
        let ack = match result {
            Ok(message) => SendAck::ok(message.clone(), self.temp_id),
            Err(e) => SendAck::failed(e.code(), e.to_string(), self.temp_id),
        };
        self.session.deliver(ServerEvent::MessageAck(ack)).await;
    }
}

/// Trim and check a message body.
pub fn validate_body(body: &str, sender_id: Uuid, recipient_id: Uuid) -> Result<String, SendError> {
    if sender_id == recipient_id {
        return Err(SendError::Validation("Cannot send a message to yourself".into()));
    }
    let body = body.trim();
    if body.is_empty() {
        return Err(SendError::Validation("Message body cannot be empty".into()));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(SendError::Validation(format!(
            "Message body exceeds {MAX_BODY_CHARS} characters"
        )));
    }
    Ok(body.to_string())
}

/// Persists messages, fans them out to room members and moves their
/// delivery status forward.
///
/// Work on one room is serialised by a per-room ordering lock held across
/// the store call and the fan-out, so every member sees a room's events in
/// persistence order. Different rooms do not contend.
pub struct DeliveryPipeline {
    store: Arc<dyn MessageStore>,
    rooms: Arc<RoomRegistry>,
    order_locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl DeliveryPipeline {
    pub fn new(store: Arc<dyn MessageStore>, rooms: Arc<RoomRegistry>) -> Self {
        Self {
            store,
            rooms,
            order_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Handle one send end to end and acknowledge it through `ack`.
    pub async fn submit_send(
        &self,
        sender: &Arc<Session>,
        payload: SendMessagePayload,
        ack: AckResponder,
    ) -> Result<Message, SendError> {
        let result = self.send_inner(sender, payload).await;
        match &result {
            Ok(message) => info!(
                "Message {} (seq {}) from {} to {} is {}",
                message.id,
                message.seq,
                message.sender_id,
                message.recipient_id,
                message.status.as_str()
            ),
            Err(SendError::Validation(reason)) => debug!("Rejected send from {}: {}", sender.user_id, reason),
            Err(e) => warn!("Send from {} failed: {}", sender.user_id, e),
        }
        ack.respond(&result).await;
        result
    }

    async fn send_inner(&self, sender: &Arc<Session>, payload: SendMessagePayload) -> Result<Message, SendError> {
        let body = validate_body(&payload.body, sender.user_id, payload.recipient_id)?;
        let room = RoomId::for_participants(sender.user_id, payload.recipient_id, payload.listing_id);
        let new = NewMessage {
            sender_id: sender.user_id,
            recipient_id: payload.recipient_id,
            listing_id: payload.listing_id,
            body,
        };

        self.in_order(&room, self.persist_and_fan_out(sender, &room, new, payload.temp_id))
            .await
    }

    async fn persist_and_fan_out(
        &self,
        sender: &Session,
        room: &RoomId,
        new: NewMessage,
        temp_id: Option<Uuid>,
    ) -> Result<Message, SendError> {
        let mut message = self.store.create(new).await?;

        // Only the sender's other devices have a pending entry to match.
        let reached = self.rooms.broadcast_each(room, Some(sender.id), |session| {
            ServerEvent::MessageReceived(MessageReceived {
                message: message.clone(),
                conversation_id: room.clone(),
                temp_id: temp_id.filter(|_| session.user_id == sender.user_id),
            })
        });

        if reached.contains(&message.recipient_id) {
            match self.store.advance_status(&[message.id], DeliveryStatus::Delivered).await {
                Ok(changed) if changed.contains(&message.id) => {
                    message.status = DeliveryStatus::Delivered;
                    self.rooms.broadcast(room, &status_update(message.id, DeliveryStatus::Delivered), None);
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to mark message {} delivered: {}", message.id, e),
            }
        }

        Ok(message)
    }

    /// Mark everything `sender_id` sent to `reader` in this room as read and
    /// announce it with a single `messages:read`. Nothing is broadcast when
    /// no message changed.
    pub async fn mark_conversation_read(
        &self,
        reader: &Session,
        room: &RoomId,
        sender_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.in_order(room, async {
            let ids = self.store.mark_read(reader.user_id, sender_id, listing_id).await?;
            if !ids.is_empty() {
                debug!("{} read {} messages in {}", reader.user_id, ids.len(), room);
                self.rooms.broadcast(
                    room,
                    &ServerEvent::MessagesRead(MessagesRead {
                        reader_id: reader.user_id,
                        conversation_id: room.clone(),
                        read_at: Utc::now(),
                        message_ids: ids.clone(),
                    }),
                    None,
                );
            }
            Ok::<_, StoreError>(ids)
        })
        .await
    }

    /// Messages waiting for a user who just joined the room become delivered.
    pub async fn mark_delivered_on_join(
        &self,
        joiner: &Session,
        room: &RoomId,
        other_user_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.in_order(room, async {
            let ids = self
                .store
                .mark_delivered(joiner.user_id, other_user_id, listing_id)
                .await?;
            for id in &ids {
                self.rooms.broadcast(room, &status_update(*id, DeliveryStatus::Delivered), None);
            }
            Ok::<_, StoreError>(ids)
        })
        .await
    }

    /// Run `work` while holding the room's ordering lock.
    async fn in_order<T>(&self, room: &RoomId, work: impl Future<Output = T>) -> T {
        let lock = self.order_locks.entry(room.clone()).or_default().clone();
        let out = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);
        self.order_locks.remove_if(room, |_, lock| Arc::strong_count(lock) == 1);
        out
    }

    #[cfg(test)]
    pub(crate) fn held_locks(&self) -> usize {
        self.order_locks.len()
    }
}

fn status_update(message_id: Uuid, status: DeliveryStatus) -> ServerEvent {
    ServerEvent::StatusUpdate(StatusUpdate {
        message_id,
        status,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use motorchat_db::MemoryStore;

    #[test]
    fn body_rules() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(validate_body("  hi there \n", a, b).unwrap(), "hi there");
        assert!(matches!(validate_body("   ", a, b), Err(SendError::Validation(_))));
        assert!(matches!(validate_body("hello", a, a), Err(SendError::Validation(_))));

        let longest = "é".repeat(MAX_BODY_CHARS);
        assert!(validate_body(&longest, a, b).is_ok());
        let too_long = "x".repeat(MAX_BODY_CHARS + 1);
        assert!(matches!(validate_body(&too_long, a, b), Err(SendError::Validation(_))));
    }

    #[tokio::test]
    async fn ordering_locks_are_released_after_use() {
        let rooms = Arc::new(RoomRegistry::new());
        let pipeline = DeliveryPipeline::new(Arc::new(MemoryStore::new()), rooms);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (session, mut rx) = Session::new(a, 8);

        let payload = SendMessagePayload {
            recipient_id: b,
            listing_id: None,
            body: "Still for sale?".into(),
            temp_id: None,
        };
        let message = pipeline
            .submit_send(&session, payload, AckResponder::new(session.clone(), None))
            .await
            .unwrap();

        assert_eq!(message.status, DeliveryStatus::Sent);
        assert_eq!(pipeline.held_locks(), 0);
        match rx.try_recv() {
            Ok(ServerEvent::MessageAck(ack)) => assert!(ack.success),
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ack_waits_out_a_full_queue() {
        let pipeline = Arc::new(DeliveryPipeline::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RoomRegistry::new()),
        ));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (session, mut rx) = Session::new(a, 1);
        let filler = ServerEvent::Error(motorchat_types::events::ErrorPayload {
            code: motorchat_types::events::ErrorCode::BadPayload,
            message: "filler".into(),
            event: None,
        });
        assert!(session.send(filler));

        let temp_id = Uuid::new_v4();
        let send = {
            let (pipeline, session) = (pipeline.clone(), session.clone());
            tokio::spawn(async move {
                let payload = SendMessagePayload {
                    recipient_id: b,
                    listing_id: None,
                    body: "Is the title clean?".into(),
                    temp_id: Some(temp_id),
                };
                let ack = AckResponder::new(session.clone(), payload.temp_id);
                pipeline.submit_send(&session, payload, ack).await
            })
        };

        assert!(matches!(rx.recv().await, Some(ServerEvent::Error(_))));
        match rx.recv().await {
            Some(ServerEvent::MessageAck(ack)) => {
                assert!(ack.success);
                assert_eq!(ack.temp_id, Some(temp_id));
            }
            other => panic!("expected ack, got {other:?}"),
        }
        assert!(send.await.unwrap().is_ok());
    }
}
