use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;
use uuid::Uuid;

use motorchat_types::models::{ConversationSummary, DeliveryStatus, Message, NewMessage};

use crate::Database;
use crate::store::{MessageStore, StoreError};

/// `MessageStore` over SQLite. Every call runs on the blocking pool so a slow
/// write never stalls the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StoreError::Task(e.to_string())
            })?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create(&self, new: NewMessage) -> Result<Message, StoreError> {
        self.run(move |db| db.insert_message(&new)).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        self.run(move |db| db.get_message(id)).await
    }

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>, StoreError> {
        self.run(move |db| db.get_conversations(user_id)).await
    }

    async fn list_thread(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Message>, StoreError> {
        self.run(move |db| db.get_thread(user_id, other_user_id, listing_id)).await
    }

    async fn advance_status(&self, ids: &[Uuid], status: DeliveryStatus) -> Result<Vec<Uuid>, StoreError> {
        let ids = ids.to_vec();
        self.run(move |db| db.advance_status(&ids, status)).await
    }

    async fn mark_delivered(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.run(move |db| {
            db.advance_conversation(recipient_id, sender_id, listing_id, DeliveryStatus::Delivered)
        })
        .await
    }

    async fn mark_read(
        &self,
        reader_id: Uuid,
        sender_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.run(move |db| db.advance_conversation(reader_id, sender_id, listing_id, DeliveryStatus::Read))
            .await
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.run(move |db| db.count_unread(user_id)).await
    }
}
