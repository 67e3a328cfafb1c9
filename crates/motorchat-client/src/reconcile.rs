use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use motorchat_types::RoomId;
use motorchat_types::events::{MessageReceived, MessagesRead, SendAck, SendMessagePayload, ServerEvent, StatusUpdate};
use motorchat_types::models::{DeliveryStatus, Message};

use crate::error::ClientError;

/// How long a send may wait for its ack before it is shown as failed.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// State of an unconfirmed send. There is no `Sent` variant: a confirmed send
/// leaves `pending()` and shows up in `messages()` with its server status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingState {
    Sending,
    Error(String),
}

/// A message the user sent that the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub temp_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub state: PendingState,
}

/// Local view of one conversation.
///
/// Confirmed messages are kept in `seq` order with at most one entry per id.
/// Optimistic entries are matched to server results by temp id only, never
/// by body or time.
#[derive(Debug, Clone)]
pub struct Conversation {
    me: Uuid,
    other_user_id: Uuid,
    listing_id: Option<Uuid>,
    room: RoomId,
    ack_timeout: Duration,
    confirmed: Vec<Message>,
    pending: Vec<PendingMessage>,
}

impl Conversation {
    pub fn new(me: Uuid, other_user_id: Uuid, listing_id: Option<Uuid>) -> Self {
        Self {
            me,
            other_user_id,
            listing_id,
            room: RoomId::for_participants(me, other_user_id, listing_id),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            confirmed: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn messages(&self) -> &[Message] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    /// Seed from history, e.g. a `list_thread` response.
    pub fn load_history(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.insert_confirmed(message);
        }
    }

    /// Add an optimistic entry and build the command that sends it.
    pub fn begin_send(&mut self, body: &str, now: DateTime<Utc>) -> Result<SendMessagePayload, ClientError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ClientError::EmptyBody);
        }

        let temp_id = Uuid::new_v4();
        self.pending.push(PendingMessage {
            temp_id,
            body: body.to_string(),
            created_at: now,
            state: PendingState::Sending,
        });

        Ok(SendMessagePayload {
            recipient_id: self.other_user_id,
            listing_id: self.listing_id,
            body: body.to_string(),
            temp_id: Some(temp_id),
        })
    }

    /// Resolve a pending entry from its ack. On success the entry is sent: it
    /// is removed from `pending()` and the server's message is merged into
    /// `messages()`. A success that arrives after the entry already timed out
    /// still wins.
    pub fn apply_ack(&mut self, ack: &SendAck) -> bool {
        let Some(temp_id) = ack.temp_id else {
            return false;
        };

        match (&ack.message, ack.success) {
            (Some(message), true) => {
                let had_pending = self.remove_pending(temp_id).is_some();
                if message.conversation_id() != self.room {
                    return had_pending;
                }
                self.insert_confirmed(message.clone()) || had_pending
            }
            _ => {
                let Some(entry) = self.pending.iter_mut().find(|p| p.temp_id == temp_id) else {
                    return false;
                };
                let reason = ack.error.clone().unwrap_or_else(|| "Message failed to send".into());
                debug!("Send {} failed: {}", temp_id, reason);
                entry.state = PendingState::Error(reason);
                true
            }
        }
    }

    pub fn apply_received(&mut self, event: &MessageReceived) -> bool {
        if event.conversation_id != self.room {
            return false;
        }
        let had_pending = event
            .temp_id
            .and_then(|temp_id| self.remove_pending(temp_id))
            .is_some();
        self.insert_confirmed(event.message.clone()) || had_pending
    }

    /// Fail every send that has waited longer than the ack timeout.
    /// Returns the temp ids that timed out.
    pub fn expire_pending(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let timeout = chrono::Duration::from_std(self.ack_timeout).unwrap_or_else(|_| chrono::Duration::days(1));
        let mut expired = Vec::new();
        for entry in &mut self.pending {
            if entry.state == PendingState::Sending && now - entry.created_at >= timeout {
                entry.state = PendingState::Error("Timed out waiting for the server".into());
                expired.push(entry.temp_id);
            }
        }
        expired
    }

    /// Drop a failed entry and start a fresh attempt with the same body.
    pub fn retry(&mut self, temp_id: Uuid, now: DateTime<Utc>) -> Result<SendMessagePayload, ClientError> {
        let index = self
            .pending
            .iter()
            .position(|p| p.temp_id == temp_id && matches!(p.state, PendingState::Error(_)))
            .ok_or(ClientError::NotRetryable(temp_id))?;
        let failed = self.pending.remove(index);
        self.begin_send(&failed.body, now)
    }

    pub fn apply_status_update(&mut self, update: &StatusUpdate) -> bool {
        self.confirmed
            .iter_mut()
            .find(|m| m.id == update.message_id)
            .is_some_and(|m| m.status.advance(update.status))
    }

    /// Returns how many messages moved to read.
    pub fn apply_read(&mut self, read: &MessagesRead) -> usize {
        if read.conversation_id != self.room {
            return 0;
        }
        let mut changed = 0;
        for message in &mut self.confirmed {
            if read.message_ids.contains(&message.id) && message.status.advance(DeliveryStatus::Read) {
                changed += 1;
            }
        }
        changed
    }

    /// Route any server event that concerns this conversation.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::MessageAck(ack) => self.apply_ack(ack),
            ServerEvent::MessageReceived(received) => self.apply_received(received),
            ServerEvent::StatusUpdate(update) => self.apply_status_update(update),
            ServerEvent::MessagesRead(read) => self.apply_read(read) > 0,
            _ => false,
        }
    }

    fn remove_pending(&mut self, temp_id: Uuid) -> Option<PendingMessage> {
        let index = self.pending.iter().position(|p| p.temp_id == temp_id)?;
        Some(self.pending.remove(index))
    }

    /// Insert keeping `seq` order. A message already present only has its
    /// status merged forward.
    fn insert_confirmed(&mut self, message: Message) -> bool {
        if let Some(existing) = self.confirmed.iter_mut().find(|m| m.id == message.id) {
            return existing.status.advance(message.status);
        }
        let at = self.confirmed.partition_point(|m| m.seq < message.seq);
        self.confirmed.insert(at, message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motorchat_types::events::ErrorCode;

    fn conversation() -> (Conversation, Uuid, Uuid) {
        let (me, seller) = (Uuid::new_v4(), Uuid::new_v4());
        (Conversation::new(me, seller, None), me, seller)
    }

    fn persisted(from: Uuid, to: Uuid, seq: i64, body: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            seq,
            sender_id: from,
            recipient_id: to,
            listing_id: None,
            body: body.into(),
            status: DeliveryStatus::Sent,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn ack_then_echo_leaves_one_message() {
        let (mut convo, me, seller) = conversation();
        let payload = convo.begin_send("  Is it still available? ", Utc::now()).unwrap();
        assert_eq!(payload.body, "Is it still available?");
        assert_eq!(convo.pending().len(), 1);

        let message = persisted(me, seller, 1, "Is it still available?");
        assert!(convo.apply_ack(&SendAck::ok(message.clone(), payload.temp_id)));
        convo.apply_received(&MessageReceived {
            message: message.clone(),
            conversation_id: convo.room().clone(),
            temp_id: payload.temp_id,
        });

        assert!(convo.pending().is_empty());
        assert_eq!(convo.messages().to_vec(), vec![message]);
    }

    #[test]
    fn echo_before_ack_also_dedups() {
        let (mut convo, me, seller) = conversation();
        let payload = convo.begin_send("hi", Utc::now()).unwrap();
        let message = persisted(me, seller, 1, "hi");

        convo.apply_received(&MessageReceived {
            message: message.clone(),
            conversation_id: convo.room().clone(),
            temp_id: payload.temp_id,
        });
        let mut delivered = message.clone();
        delivered.status = DeliveryStatus::Delivered;
        convo.apply_ack(&SendAck::ok(delivered, payload.temp_id));

        assert!(convo.pending().is_empty());
        assert_eq!(convo.messages().len(), 1);
        assert_eq!(convo.messages()[0].status, DeliveryStatus::Delivered);
    }

    #[test]
    fn blank_body_never_becomes_pending() {
        let (mut convo, _, _) = conversation();
        assert!(matches!(convo.begin_send(" \n ", Utc::now()), Err(ClientError::EmptyBody)));
        assert!(convo.pending().is_empty());
    }

    #[test]
    fn failed_ack_marks_entry_and_retry_replaces_it() {
        let (mut convo, _, _) = conversation();
        let payload = convo.begin_send("offer", Utc::now()).unwrap();

        convo.apply_ack(&SendAck::failed(ErrorCode::PersistenceError, "Message could not be saved", payload.temp_id));
        assert_eq!(
            convo.pending()[0].state,
            PendingState::Error("Message could not be saved".into())
        );

        let retry = convo.retry(payload.temp_id.unwrap(), Utc::now()).unwrap();
        assert_ne!(retry.temp_id, payload.temp_id);
        assert_eq!(convo.pending().len(), 1);
        assert_eq!(convo.pending()[0].state, PendingState::Sending);
        assert!(convo.retry(retry.temp_id.unwrap(), Utc::now()).is_err());
    }

    #[test]
    fn timeout_then_late_success_confirms() {
        let (mut convo, me, seller) = conversation();
        let sent_at = Utc::now();
        let payload = convo.begin_send("hello", sent_at).unwrap();

        assert!(convo.expire_pending(sent_at + chrono::Duration::seconds(1)).is_empty());
        let expired = convo.expire_pending(sent_at + chrono::Duration::seconds(6));
        assert_eq!(expired, vec![payload.temp_id.unwrap()]);
        assert!(matches!(convo.pending()[0].state, PendingState::Error(_)));

        convo.apply_ack(&SendAck::ok(persisted(me, seller, 1, "hello"), payload.temp_id));
        assert!(convo.pending().is_empty());
        assert_eq!(convo.messages().len(), 1);
    }

    #[test]
    fn confirmed_messages_sorted_by_seq_and_status_monotonic() {
        let (mut convo, me, seller) = conversation();
        let later = persisted(seller, me, 7, "second");
        let earlier = persisted(seller, me, 3, "first");
        convo.load_history([later.clone(), earlier.clone()]);

        let seqs: Vec<i64> = convo.messages().iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![3, 7]);

        convo.apply_read(&MessagesRead {
            reader_id: seller,
            conversation_id: convo.room().clone(),
            read_at: Utc::now(),
            message_ids: vec![earlier.id],
        });
        assert!(!convo.apply_status_update(&StatusUpdate {
            message_id: earlier.id,
            status: DeliveryStatus::Delivered,
            timestamp: Utc::now(),
        }));
        assert_eq!(convo.messages()[0].status, DeliveryStatus::Read);
        assert_eq!(convo.messages()[1].status, DeliveryStatus::Sent);
    }

    #[test]
    fn events_for_other_rooms_are_ignored() {
        let (mut convo, me, _) = conversation();
        let stranger = Uuid::new_v4();
        let message = persisted(stranger, me, 1, "spam");

        assert!(!convo.apply(&ServerEvent::MessageReceived(MessageReceived {
            conversation_id: message.conversation_id(),
            message,
            temp_id: None,
        })));
        assert!(convo.messages().is_empty());
    }
}
