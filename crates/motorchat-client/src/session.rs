use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use url::Url;

use motorchat_types::events::{ClientCommand, ReadyPayload, ServerEvent};

use crate::error::ClientError;

/// One authenticated connection to the gateway.
///
/// Constructed explicitly per login; nothing here is global, so tests and
/// multi-account tools can hold several side by side.
pub struct ChatSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ready: ReadyPayload,
}

impl ChatSession {
    /// Connect to `gateway_url` (e.g. `ws://host:3000/gateway`) and wait for
    /// the server's `ready`.
    pub async fn connect(gateway_url: &str, token: &str) -> Result<Self, ClientError> {
        let mut url = Url::parse(gateway_url)?;
        url.query_pairs_mut().append_pair("token", token);

        let (mut stream, _) = connect_async(url.as_str()).await?;
        match read_event(&mut stream).await? {
            Some(ServerEvent::Ready(ready)) => {
                debug!("Gateway session {} ready for {}", ready.session_id, ready.user_id);
                Ok(Self { stream, ready })
            }
            Some(other) => Err(ClientError::Handshake(format!("{other:?}"))),
            None => Err(ClientError::Handshake("connection closed".into())),
        }
    }

    pub fn ready(&self) -> &ReadyPayload {
        &self.ready
    }

    pub async fn send(&mut self, command: &ClientCommand) -> Result<(), ClientError> {
        let text = serde_json::to_string(command)?;
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Next event from the server, or `None` once the connection is closed.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>, ClientError> {
        read_event(&mut self.stream).await
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

async fn read_event(
    stream: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> Result<Option<ServerEvent>, ClientError> {
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
            Message::Close(_) => return Ok(None),
            Message::Binary(_) => warn!("Ignoring binary frame from gateway"),
            // Pings are answered by tungstenite on the next read.
            _ => {}
        }
    }
    Ok(None)
}
