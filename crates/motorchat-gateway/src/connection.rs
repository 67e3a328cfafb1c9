use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

use motorchat_types::events::{ClientCommand, ServerEvent};

use crate::dispatcher::Dispatcher;
use crate::error::ProtocolError;
use crate::session::Session;

/// Decode one text frame. Frames naming an event we do not know are told
/// apart from known events with a bad payload.
pub fn parse_command(text: &str) -> Result<ClientCommand, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| ProtocolError::BadPayload {
        event: None,
        reason: e.to_string(),
    })?;

    let Some(name) = value.get("event").and_then(|v| v.as_str()) else {
        return Err(ProtocolError::BadPayload {
            event: None,
            reason: "missing \"event\" field".into(),
        });
    };
    if !ClientCommand::NAMES.contains(&name) {
        return Err(ProtocolError::UnknownEvent(name.to_string()));
    }
    let name = name.to_string();

    serde_json::from_value(value).map_err(|e| ProtocolError::BadPayload {
        event: Some(name),
        reason: e.to_string(),
    })
}

/// Drive an upgraded, already authenticated socket until either side goes
/// away, then tear the session down.
///
/// The writer drains the session's outbound queue and pings every heartbeat
/// interval; two pings in a row without a pong drop the connection.
pub async fn run_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    session: Arc<Session>,
    mut outbound: mpsc::Receiver<ServerEvent>,
) {
    let (mut sender, mut receiver) = socket.split();
    let heartbeat_interval = dispatcher.config().heartbeat_interval;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let writer_session = session.id;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode event for session {}: {}", writer_session, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Session {} missed {} pongs, dropping connection",
                                writer_session, missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    let reader_dispatcher = dispatcher.clone();
    let reader_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match parse_command(text.as_str()) {
                    Ok(command) => {
                        trace!("Session {} -> {}", reader_session.id, command.name());
                        reader_dispatcher.dispatch(&reader_session, command).await;
                    }
                    Err(e) => {
                        warn!(
                            "Session {} sent a bad frame: {} -- raw: {}",
                            reader_session.id,
                            e,
                            text.as_str().chars().take(200).collect::<String>()
                        );
                        reader_session.send(e.to_event(None));
                    }
                },
                Message::Binary(_) => {
                    warn!("Session {} sent a binary frame, ignoring", reader_session.id);
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Let the aborted side unwind before the session is torn down.
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            send_task.abort();
            let _ = send_task.await;
        }
    }

    dispatcher.disconnect(session.id);
    info!("Session {} ({}) disconnected from gateway", session.id, session.user_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use motorchat_types::events::ErrorCode;
    use uuid::Uuid;

    #[test]
    fn parses_known_commands() {
        let other = Uuid::new_v4();
        let raw = format!(r#"{{"event":"conversation:join","data":{{"otherUserId":"{other}"}}}}"#);

        match parse_command(&raw).unwrap() {
            ClientCommand::ConversationJoin(p) => assert_eq!(p.other_user_id, other),
            cmd => panic!("unexpected {cmd:?}"),
        }
    }

    #[test]
    fn distinguishes_unknown_events_from_bad_payloads() {
        let unknown = parse_command(r#"{"event":"listing:bump","data":{}}"#).unwrap_err();
        assert_eq!(unknown.code(), ErrorCode::UnknownEvent);

        let bad = parse_command(r#"{"event":"message:send","data":{"body":"no recipient"}}"#).unwrap_err();
        assert_eq!(bad.code(), ErrorCode::BadPayload);
        match bad.to_event(None) {
            ServerEvent::Error(err) => assert_eq!(err.event.as_deref(), Some("message:send")),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(parse_command("not json").unwrap_err().code(), ErrorCode::BadPayload);
        assert_eq!(parse_command(r#"{"data":{}}"#).unwrap_err().code(), ErrorCode::BadPayload);
    }
}
