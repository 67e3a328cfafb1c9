use crate::Database;
use crate::models::MessageRow;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Row, params};
use uuid::Uuid;

use motorchat_types::RoomId;
use motorchat_types::models::{ConversationSummary, DeliveryStatus, Message, NewMessage};

const MESSAGE_COLUMNS: &str =
    "seq, id, sender_id, recipient_id, listing_id, body, status, created_at";

impl Database {
    // -- Messages --

    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let id = Uuid::new_v4();
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, listing_id, body, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'sent', ?6)",
                params![
                    id.to_string(),
                    new.sender_id.to_string(),
                    new.recipient_id.to_string(),
                    new.listing_id.map(|l| l.to_string()),
                    new.body,
                    timestamp(created_at),
                ],
            )?;

            Ok(Message {
                id,
                seq: conn.last_insert_rowid(),
                sender_id: new.sender_id,
                recipient_id: new.recipient_id,
                listing_id: new.listing_id,
                body: new.body.clone(),
                status: DeliveryStatus::Sent,
                created_at,
            })
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([id.to_string()], message_row).optional()?;
            row.map(Message::try_from).transpose()
        })
    }

    /// Both directions of a conversation, oldest first.
    pub fn get_thread(&self, user_id: Uuid, other_id: Uuid, listing_id: Option<Uuid>) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE ((sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1))
                   AND listing_id IS ?3
                 ORDER BY seq ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        user_id.to_string(),
                        other_id.to_string(),
                        listing_id.map(|l| l.to_string())
                    ],
                    message_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(Message::try_from).collect()
        })
    }

    /// One entry per (other participant, listing), most recent activity first.
    pub fn get_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let sql = format!(
                "WITH convo AS (
                     SELECT CASE WHEN sender_id = ?1 THEN recipient_id ELSE sender_id END AS other_id,
                            listing_id,
                            MAX(seq) AS last_seq,
                            SUM(CASE WHEN recipient_id = ?1 AND status != 'read' THEN 1 ELSE 0 END) AS unread
                     FROM messages
                     WHERE sender_id = ?1 OR recipient_id = ?1
                     GROUP BY other_id, listing_id
                 )
                 SELECT c.other_id, c.unread, {cols}
                 FROM convo c
                 JOIN messages m ON m.seq = c.last_seq
                 ORDER BY c.last_seq DESC",
                cols = MESSAGE_COLUMNS
                    .split(", ")
                    .map(|c| format!("m.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    let other: String = row.get(0)?;
                    let unread: i64 = row.get(1)?;
                    let message = MessageRow {
                        seq: row.get(2)?,
                        id: row.get(3)?,
                        sender_id: row.get(4)?,
                        recipient_id: row.get(5)?,
                        listing_id: row.get(6)?,
                        body: row.get(7)?,
                        status: row.get(8)?,
                        created_at: row.get(9)?,
                    };
                    Ok((other, unread, message))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(other, unread, row)| -> Result<ConversationSummary> {
                    let last_message = Message::try_from(row)?;
                    let other_user_id: Uuid = other.parse()?;
                    Ok(ConversationSummary {
                        conversation_id: RoomId::for_participants(user_id, other_user_id, last_message.listing_id),
                        other_user_id,
                        listing_id: last_message.listing_id,
                        last_message,
                        unread_count: unread.max(0) as u64,
                    })
                })
                .collect()
        })
    }

    /// Move the given messages forward to `status`. Messages already at or
    /// past it are left alone. Returns the ids that changed.
    pub fn advance_status(&self, ids: &[Uuid], status: DeliveryStatus) -> Result<Vec<Uuid>> {
        let Some((column, lower)) = transition(status) else {
            return Ok(Vec::new());
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = timestamp(Utc::now());
            let mut changed = Vec::new();
            {
                let sql = format!(
                    "UPDATE messages SET status = ?1, {column} = ?2 WHERE id = ?3 AND status IN ({lower})"
                );
                let mut stmt = tx.prepare(&sql)?;
                for id in ids {
                    if stmt.execute(params![status.as_str(), now, id.to_string()])? > 0 {
                        changed.push(*id);
                    }
                }
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    /// Advance every message `sender_id` sent to `recipient_id` in one room.
    /// Returns the changed ids in persistence order.
    pub fn advance_conversation(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
        listing_id: Option<Uuid>,
        status: DeliveryStatus,
    ) -> Result<Vec<Uuid>> {
        let Some((column, lower)) = transition(status) else {
            return Ok(Vec::new());
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let filter = format!(
                "recipient_id = ?1 AND sender_id = ?2 AND listing_id IS ?3 AND status IN ({lower})"
            );
            let ids: Vec<String> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT id FROM messages WHERE {filter} ORDER BY seq ASC"
                ))?;
                stmt.query_map(
                    params![
                        recipient_id.to_string(),
                        sender_id.to_string(),
                        listing_id.map(|l| l.to_string())
                    ],
                    |row| row.get(0),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?
            };

            tx.execute(
                &format!("UPDATE messages SET status = ?4, {column} = ?5 WHERE {filter}"),
                params![
                    recipient_id.to_string(),
                    sender_id.to_string(),
                    listing_id.map(|l| l.to_string()),
                    status.as_str(),
                    timestamp(Utc::now()),
                ],
            )?;
            tx.commit()?;

            ids.iter()
                .map(|id| id.parse::<Uuid>().map_err(anyhow::Error::from))
                .collect()
        })
    }

    pub fn count_unread(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND status != 'read'",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }
}

/// Timestamp column to stamp and the statuses allowed to move to `status`.
fn transition(status: DeliveryStatus) -> Option<(&'static str, &'static str)> {
    match status {
        DeliveryStatus::Sent => None,
        DeliveryStatus::Delivered => Some(("delivered_at", "'sent'")),
        DeliveryStatus::Read => Some(("read_at", "'sent', 'delivered'")),
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        listing_id: row.get(4)?,
        body: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
