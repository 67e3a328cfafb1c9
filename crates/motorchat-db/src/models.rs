use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use motorchat_types::models::{DeliveryStatus, Message};

/// Database row types, one field per SQLite column.
/// Distinct from motorchat-types models to keep the DB layer independent.
pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub listing_id: Option<String>,
    pub body: String,
    pub status: String,
    pub created_at: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_uuid(&row.id, "id")?,
            seq: row.seq,
            sender_id: parse_uuid(&row.sender_id, "sender_id")?,
            recipient_id: parse_uuid(&row.recipient_id, "recipient_id")?,
            listing_id: row
                .listing_id
                .as_deref()
                .map(|l| parse_uuid(l, "listing_id"))
                .transpose()?,
            status: DeliveryStatus::parse(&row.status)
                .ok_or_else(|| anyhow!("Corrupt status '{}' on message {}", row.status, row.id))?,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .with_context(|| format!("Corrupt created_at on message {}", row.id))?
                .with_timezone(&Utc),
            body: row.body,
        })
    }
}

fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    value
        .parse()
        .with_context(|| format!("Corrupt {} '{}'", column, value))
}
