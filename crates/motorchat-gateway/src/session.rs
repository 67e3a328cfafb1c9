use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use motorchat_types::RoomId;
use motorchat_types::events::ServerEvent;

/// One live authenticated connection. A user may hold several at once.
///
/// Outbound events go through a bounded queue drained by the connection's
/// writer task, so a stalled socket never blocks the code that emits to it.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<ServerEvent>,
    live: AtomicBool,
    rooms: Mutex<HashSet<RoomId>>,
}

impl Session {
    pub fn new(user_id: Uuid, capacity: usize) -> (Arc<Self>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id,
            connected_at: Utc::now(),
            outbound: tx,
            live: AtomicBool::new(true),
            rooms: Mutex::new(HashSet::new()),
        });
        (session, rx)
    }

    /// Queue an event for this session. Returns false if it was dropped
    /// because the session is closed or its queue is full.
    pub fn send(&self, event: ServerEvent) -> bool {
        if !self.is_live() {
            return false;
        }
        match self.outbound.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for session {}, dropping event", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Session {} writer gone, dropping event", self.id);
                false
            }
        }
    }

    /// Queue an event that must not be dropped for backpressure, waiting
    /// for room in the queue if it is full. Returns false only once the
    /// session is closed or its writer is gone.
    pub async fn deliver(&self, event: ServerEvent) -> bool {
        if !self.is_live() {
            return false;
        }
        match self.outbound.send(event).await {
            Ok(()) => true,
            Err(_) => {
                debug!("Session {} writer gone, dropping event", self.id);
                false
            }
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Returns true only for the call that actually closed the session.
    pub fn mark_closed(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }

    pub fn has_joined(&self, room: &RoomId) -> bool {
        self.rooms.lock().contains(room)
    }

    pub fn joined_rooms(&self) -> Vec<RoomId> {
        self.rooms.lock().iter().cloned().collect()
    }

    pub(crate) fn note_joined(&self, room: RoomId) -> bool {
        self.rooms.lock().insert(room)
    }

    pub(crate) fn note_left(&self, room: &RoomId) -> bool {
        self.rooms.lock().remove(room)
    }

    pub(crate) fn take_rooms(&self) -> Vec<RoomId> {
        self.rooms.lock().drain().collect()
    }
}
