use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use motorchat_types::RoomId;
use motorchat_types::models::{ConversationSummary, DeliveryStatus, Message, NewMessage};

use crate::store::{MessageStore, StoreError};

/// In-memory `MessageStore` for tests and local development.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

struct MemoryInner {
    /// Kept in persistence order.
    messages: Vec<Message>,
    next_seq: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                messages: Vec::new(),
                next_seq: 1,
            }),
        }
    }

    fn advance_where<P>(&self, status: DeliveryStatus, mut pred: P) -> Vec<Uuid>
    where
        P: FnMut(&Message) -> bool,
    {
        let mut inner = self.inner.lock();
        inner
            .messages
            .iter_mut()
            .filter(|m| pred(&**m))
            .filter_map(|m| m.status.advance(status).then_some(m.id))
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn in_conversation(m: &Message, user_id: Uuid, other_id: Uuid, listing_id: Option<Uuid>) -> bool {
    m.listing_id == listing_id
        && ((m.sender_id == user_id && m.recipient_id == other_id)
            || (m.sender_id == other_id && m.recipient_id == user_id))
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create(&self, new: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock();
        let message = Message {
            id: Uuid::new_v4(),
            seq: inner.next_seq,
            sender_id: new.sender_id,
            recipient_id: new.recipient_id,
            listing_id: new.listing_id,
            body: new.body,
            status: DeliveryStatus::Sent,
            created_at: Utc::now(),
        };
        inner.next_seq += 1;
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self.inner.lock().messages.iter().find(|m| m.id == id).cloned())
    }

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>, StoreError> {
        let inner = self.inner.lock();
        let mut convos: BTreeMap<(Uuid, Option<Uuid>), ConversationSummary> = BTreeMap::new();

        for m in &inner.messages {
            let other = if m.sender_id == user_id {
                m.recipient_id
            } else if m.recipient_id == user_id {
                m.sender_id
            } else {
                continue;
            };
            let unread = u64::from(m.recipient_id == user_id && m.status != DeliveryStatus::Read);

            convos
                .entry((other, m.listing_id))
                .and_modify(|c| {
                    c.last_message = m.clone();
                    c.unread_count += unread;
                })
                .or_insert_with(|| ConversationSummary {
                    conversation_id: RoomId::for_participants(user_id, other, m.listing_id),
                    other_user_id: other,
                    listing_id: m.listing_id,
                    last_message: m.clone(),
                    unread_count: unread,
                });
        }

        let mut list: Vec<_> = convos.into_values().collect();
        list.sort_by(|a, b| b.last_message.seq.cmp(&a.last_message.seq));
        Ok(list)
    }

    async fn list_thread(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .inner
            .lock()
            .messages
            .iter()
            .filter(|m| in_conversation(m, user_id, other_user_id, listing_id))
            .cloned()
            .collect())
    }

    async fn advance_status(&self, ids: &[Uuid], status: DeliveryStatus) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.advance_where(status, |m| ids.contains(&m.id)))
    }

    async fn mark_delivered(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.advance_where(DeliveryStatus::Delivered, |m| {
            m.recipient_id == recipient_id && m.sender_id == sender_id && m.listing_id == listing_id
        }))
    }

    async fn mark_read(
        &self,
        reader_id: Uuid,
        sender_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.advance_where(DeliveryStatus::Read, |m| {
            m.recipient_id == reader_id && m.sender_id == sender_id && m.listing_id == listing_id
        }))
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.recipient_id == user_id && m.status != DeliveryStatus::Read)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send(store: &MemoryStore, from: Uuid, to: Uuid, body: &str) -> Message {
        store
            .create(NewMessage {
                sender_id: from,
                recipient_id: to,
                listing_id: None,
                body: body.to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn delivered_then_read_is_monotonic() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let msg = send(&store, a, b, "hello").await;

        assert_eq!(store.mark_delivered(b, a, None).await.unwrap(), vec![msg.id]);
        assert!(store.mark_delivered(b, a, None).await.unwrap().is_empty());
        assert_eq!(store.mark_read(b, a, None).await.unwrap(), vec![msg.id]);
        assert!(
            store
                .advance_status(&[msg.id], DeliveryStatus::Delivered)
                .await
                .unwrap()
                .is_empty()
        );

        let stored = store.get(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Read);
    }

    #[tokio::test]
    async fn conversations_ordered_by_latest_activity() {
        let store = MemoryStore::new();
        let me = Uuid::new_v4();
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());

        send(&store, x, me, "from x").await;
        send(&store, y, me, "from y").await;
        send(&store, me, x, "back to x").await;

        let convos = store.list_conversations(me).await.unwrap();
        assert_eq!(convos.len(), 2);
        assert_eq!(convos[0].other_user_id, x);
        assert_eq!(convos[0].last_message.body, "back to x");
        assert_eq!(convos[0].unread_count, 1);
        assert_eq!(convos[1].other_user_id, y);
        assert_eq!(store.unread_count(me).await.unwrap(), 2);
    }
}
