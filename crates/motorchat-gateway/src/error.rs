use motorchat_db::StoreError;
use motorchat_types::RoomId;
use motorchat_types::events::{ErrorCode, ErrorPayload, ServerEvent};

/// Why a `message:send` was refused. Reported only to the sender, through
/// the send's acknowledgement.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("{0}")]
    Validation(String),

    #[error("Message could not be saved")]
    Persistence(#[from] StoreError),
}

impl SendError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Persistence(_) => ErrorCode::PersistenceError,
        }
    }
}

/// A command that could not be carried out. Reported to the originating
/// session as an `error` event; the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed payload: {reason}")]
    BadPayload { event: Option<String>, reason: String },

    #[error("Unknown event '{0}'")]
    UnknownEvent(String),

    #[error("Not joined to conversation {0}")]
    NotJoined(RoomId),

    #[error("Conversation id {given} does not match participants ({expected})")]
    ConversationMismatch { given: RoomId, expected: RoomId },

    #[error("Cannot open a conversation with yourself")]
    InvalidConversation,

    #[error("Message store unavailable")]
    Store(#[from] StoreError),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadPayload { .. } => ErrorCode::BadPayload,
            Self::UnknownEvent(_) => ErrorCode::UnknownEvent,
            Self::NotJoined(_) => ErrorCode::NotJoined,
            Self::ConversationMismatch { .. } => ErrorCode::ConversationMismatch,
            Self::InvalidConversation => ErrorCode::InvalidConversation,
            Self::Store(_) => ErrorCode::PersistenceError,
        }
    }

    /// Build the `error` event. `event` names the command being handled when
    /// the error itself does not carry one.
    pub fn to_event(&self, event: Option<&str>) -> ServerEvent {
        let event = match self {
            Self::BadPayload { event: Some(name), .. } => Some(name.clone()),
            Self::UnknownEvent(name) => Some(name.clone()),
            _ => event.map(str::to_owned),
        };
        ServerEvent::Error(ErrorPayload {
            code: self.code(),
            message: self.to_string(),
            event,
        })
    }
}
