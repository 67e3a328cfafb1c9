use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RoomId;
use crate::models::{DeliveryStatus, Message, PresenceRecord, PresenceStatus};

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    /// Submit a message; answered with exactly one `message:ack`
    #[serde(rename = "message:send")]
    MessageSend(SendMessagePayload),

    /// Mark everything the other participant sent in a room as read
    #[serde(rename = "messages:mark_read")]
    MarkRead(MarkReadPayload),

    #[serde(rename = "conversation:join")]
    ConversationJoin(ConversationPayload),

    #[serde(rename = "conversation:leave")]
    ConversationLeave(ConversationPayload),

    #[serde(rename = "typing:start")]
    TypingStart(TypingPayload),

    #[serde(rename = "typing:stop")]
    TypingStop(TypingPayload),
}

impl ClientCommand {
    /// Wire name of the command, used when reporting errors back.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSend(_) => "message:send",
            Self::MarkRead(_) => "messages:mark_read",
            Self::ConversationJoin(_) => "conversation:join",
            Self::ConversationLeave(_) => "conversation:leave",
            Self::TypingStart(_) => "typing:start",
            Self::TypingStop(_) => "typing:stop",
        }
    }

    pub const NAMES: [&'static str; 6] = [
        "message:send",
        "messages:mark_read",
        "conversation:join",
        "conversation:leave",
        "typing:start",
        "typing:stop",
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub recipient_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<Uuid>,
    pub body: String,
    /// Client correlation token, echoed in the ack and the fan-out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<RoomId>,
    pub sender_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<RoomId>,
    pub other_user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<Uuid>,
}

/// Typing signal. Inbound `userId` is ignored; the server always relays the
/// authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

/// Events sent FROM server TO client over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Connection accepted
    #[serde(rename = "ready")]
    Ready(ReadyPayload),

    /// Reply to one `message:send`
    #[serde(rename = "message:ack")]
    MessageAck(SendAck),

    /// A message was persisted in a room this session has joined
    #[serde(rename = "message:received")]
    MessageReceived(MessageReceived),

    #[serde(rename = "message:status_update")]
    StatusUpdate(StatusUpdate),

    /// One batch per mark-read pass
    #[serde(rename = "messages:read")]
    MessagesRead(MessagesRead),

    #[serde(rename = "typing:start")]
    TypingStart(TypingPayload),

    #[serde(rename = "typing:stop")]
    TypingStop(TypingPayload),

    #[serde(rename = "user:presence")]
    Presence(PresenceUpdate),

    /// Protocol-level failure; the connection stays open
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub session_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<Uuid>,
}

impl SendAck {
    pub fn ok(message: Message, temp_id: Option<Uuid>) -> Self {
        Self {
            success: true,
            message: Some(message),
            error: None,
            code: None,
            temp_id,
        }
    }

    pub fn failed(code: ErrorCode, error: impl Into<String>, temp_id: Option<Uuid>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            code: Some(code),
            temp_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceived {
    pub message: Message,
    pub conversation_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub message_id: Uuid,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRead {
    pub reader_id: Uuid,
    pub conversation_id: RoomId,
    pub read_at: DateTime<Utc>,
    #[serde(default)]
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: Uuid,
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<PresenceRecord> for PresenceUpdate {
    fn from(record: PresenceRecord) -> Self {
        Self {
            user_id: record.user_id,
            status: record.status,
            last_seen: record.last_seen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    PersistenceError,
    BadPayload,
    UnknownEvent,
    NotJoined,
    ConversationMismatch,
    InvalidConversation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_command_wire_shape() {
        let recipient = Uuid::new_v4();
        let temp = Uuid::new_v4();
        let raw = format!(
            r#"{{"event":"message:send","data":{{"recipientId":"{recipient}","body":"Hello","tempId":"{temp}"}}}}"#
        );

        let cmd: ClientCommand = serde_json::from_str(&raw).unwrap();
        match cmd {
            ClientCommand::MessageSend(p) => {
                assert_eq!(p.recipient_id, recipient);
                assert_eq!(p.body, "Hello");
                assert_eq!(p.temp_id, Some(temp));
                assert!(p.listing_id.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn command_names_match_serde_tags() {
        let other = Uuid::new_v4();
        let room = RoomId::for_participants(other, Uuid::new_v4(), None);
        let commands = [
            ClientCommand::MessageSend(SendMessagePayload {
                recipient_id: other,
                listing_id: None,
                body: "x".into(),
                temp_id: None,
            }),
            ClientCommand::MarkRead(MarkReadPayload {
                conversation_id: None,
                sender_id: other,
                listing_id: None,
            }),
            ClientCommand::ConversationJoin(ConversationPayload {
                conversation_id: None,
                other_user_id: other,
                listing_id: None,
            }),
            ClientCommand::ConversationLeave(ConversationPayload {
                conversation_id: None,
                other_user_id: other,
                listing_id: None,
            }),
            ClientCommand::TypingStart(TypingPayload { conversation_id: room.clone(), user_id: None }),
            ClientCommand::TypingStop(TypingPayload { conversation_id: room, user_id: None }),
        ];

        for (cmd, name) in commands.iter().zip(ClientCommand::NAMES) {
            let value = serde_json::to_value(cmd).unwrap();
            assert_eq!(value["event"], name);
            assert_eq!(cmd.name(), name);
        }
    }

    #[test]
    fn failed_ack_omits_message() {
        let ack = SendAck::failed(ErrorCode::ValidationError, "Message body is empty", None);
        let value = serde_json::to_value(ServerEvent::MessageAck(ack)).unwrap();

        assert_eq!(value["event"], "message:ack");
        assert_eq!(value["data"]["success"], false);
        assert_eq!(value["data"]["code"], "VALIDATION_ERROR");
        assert!(value["data"].get("message").is_none());
    }
}
