use async_trait::async_trait;
use uuid::Uuid;

use motorchat_types::models::{ConversationSummary, DeliveryStatus, Message, NewMessage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] anyhow::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Durable message storage consumed by the gateway and the read API.
///
/// The store is the single source of truth for message content, ordering
/// (`Message::seq`) and delivery status. Status updates are monotonic: a
/// message is never moved back to an earlier status.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message with status `sent`, assigning id, seq and timestamp.
    async fn create(&self, new: NewMessage) -> Result<Message, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError>;

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>, StoreError>;

    /// Both directions of one conversation in persistence order.
    async fn list_thread(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Message>, StoreError>;

    /// Move specific messages forward to `status`; returns the ids that changed.
    async fn advance_status(&self, ids: &[Uuid], status: DeliveryStatus) -> Result<Vec<Uuid>, StoreError>;

    /// `sent` messages from `sender_id` to `recipient_id` become `delivered`.
    async fn mark_delivered(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Every message from `sender_id` to `reader_id` not yet read becomes `read`.
    async fn mark_read(
        &self,
        reader_id: Uuid,
        sender_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError>;

    async fn unread_count(&self, user_id: Uuid) -> Result<u64, StoreError>;
}
