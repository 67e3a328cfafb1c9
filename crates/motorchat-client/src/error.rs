use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid gateway url: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("expected ready, got {0}")]
    Handshake(String),

    #[error("message body is empty")]
    EmptyBody,

    #[error("no failed message with temp id {0}")]
    NotRetryable(Uuid),
}
