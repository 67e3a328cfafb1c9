use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RoomId;

/// Longest message body accepted, counted in characters after trimming.
pub const MAX_BODY_CHARS: usize = 4000;

/// Delivery lifecycle of a persisted message. Ordered so that a status can
/// only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Move to `next` if it is further along. Returns whether anything changed.
    pub fn advance(&mut self, next: DeliveryStatus) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// A message as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    /// Store-assigned persistence sequence; defines the order of a thread.
    pub seq: i64,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<Uuid>,
    pub body: String,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn conversation_id(&self) -> RoomId {
        RoomId::for_participants(self.sender_id, self.recipient_id, self.listing_id)
    }
}

/// A message about to be handed to the store. Id, sequence, timestamp and
/// initial status are assigned on persistence.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub listing_id: Option<Uuid>,
    pub body: String,
}

/// One row of a user's inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: RoomId,
    pub other_user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<Uuid>,
    pub last_message: Message,
    pub unread_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: Uuid,
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        let mut status = DeliveryStatus::Sent;
        assert!(status.advance(DeliveryStatus::Delivered));
        assert!(!status.advance(DeliveryStatus::Sent));
        assert_eq!(status, DeliveryStatus::Delivered);

        assert!(status.advance(DeliveryStatus::Read));
        assert!(!status.advance(DeliveryStatus::Delivered));
        assert!(!status.advance(DeliveryStatus::Read));
        assert_eq!(status, DeliveryStatus::Read);
    }

    #[test]
    fn status_parse_matches_wire_names() {
        for status in [DeliveryStatus::Sent, DeliveryStatus::Delivered, DeliveryStatus::Read] {
            assert_eq!(DeliveryStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(DeliveryStatus::parse("bogus"), None);
    }

    #[test]
    fn message_knows_its_room() {
        let seller = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        let listing = Some(Uuid::new_v4());
        let msg = Message {
            id: Uuid::new_v4(),
            seq: 1,
            sender_id: buyer,
            recipient_id: seller,
            listing_id: listing,
            body: "Is the car still available?".into(),
            status: DeliveryStatus::Sent,
            created_at: Utc::now(),
        };

        assert_eq!(msg.conversation_id(), RoomId::for_participants(seller, buyer, listing));
    }
}
