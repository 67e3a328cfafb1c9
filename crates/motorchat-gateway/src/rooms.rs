use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use motorchat_types::RoomId;
use motorchat_types::events::ServerEvent;

use crate::session::Session;

/// Which sessions are currently joined to which conversation room.
///
/// Rooms exist only while they have members; the last leave removes the entry.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, HashMap<Uuid, Arc<Session>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to a room. Joining twice is a no-op; returns whether
    /// the session was newly added.
    pub fn join(&self, room: &RoomId, session: &Arc<Session>) -> bool {
        let added = self
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(session.id, session.clone())
            .is_none();
        session.note_joined(room.clone());
        added
    }

    pub fn leave(&self, room: &RoomId, session: &Session) -> bool {
        session.note_left(room);
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(&session.id).is_some(),
            None => false,
        };
        self.rooms.remove_if(room, |_, members| members.is_empty());
        removed
    }

    /// Remove a session from every room it joined. Returns those rooms.
    pub fn leave_all(&self, session: &Session) -> Vec<RoomId> {
        let rooms = session.take_rooms();
        for room in &rooms {
            if let Some(mut members) = self.rooms.get_mut(room) {
                members.remove(&session.id);
            }
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        rooms
    }

    pub fn members(&self, room: &RoomId) -> Vec<Arc<Session>> {
        self.rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Deliver `event` to every live session in `room` except `exclude`.
    /// Returns the distinct users whose sessions accepted the event.
    pub fn broadcast(&self, room: &RoomId, event: &ServerEvent, exclude: Option<Uuid>) -> Vec<Uuid> {
        self.broadcast_each(room, exclude, |_| event.clone())
    }

    /// Like `broadcast`, but builds the event per receiving session.
    pub fn broadcast_each<F>(&self, room: &RoomId, exclude: Option<Uuid>, mut event_for: F) -> Vec<Uuid>
    where
        F: FnMut(&Session) -> ServerEvent,
    {
        // Snapshot first so no shard lock is held while queueing.
        let members = self.members(room);
        let mut reached = Vec::new();
        for session in members {
            if Some(session.id) == exclude {
                continue;
            }
            if session.send(event_for(&session)) && !reached.contains(&session.user_id) {
                reached.push(session.user_id);
            }
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motorchat_types::events::TypingPayload;

    fn typing(room: &RoomId) -> ServerEvent {
        ServerEvent::TypingStart(TypingPayload {
            conversation_id: room.clone(),
            user_id: None,
        })
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_and_absent_sessions() {
        let registry = RoomRegistry::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let room = RoomId::for_participants(a, b, None);

        let (sa, mut rx_a) = Session::new(a, 8);
        let (sb, mut rx_b) = Session::new(b, 8);
        let (_sc, mut rx_c) = Session::new(c, 8);
        registry.join(&room, &sa);
        registry.join(&room, &sb);

        let reached = registry.broadcast(&room, &typing(&room), Some(sa.id));

        assert_eq!(reached, vec![b]);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn rooms_are_pruned_when_empty() {
        let registry = RoomRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = RoomId::for_participants(a, b, None);
        let (sa, _rx) = Session::new(a, 8);

        assert!(registry.join(&room, &sa));
        assert!(!registry.join(&room, &sa));
        assert_eq!(registry.members(&room).len(), 1);

        assert!(registry.leave(&room, &sa));
        assert!(!registry.leave(&room, &sa));
        assert_eq!(registry.room_count(), 0);
        assert!(!sa.has_joined(&room));
    }

    #[test]
    fn leave_all_clears_every_membership() {
        let registry = RoomRegistry::new();
        let me = Uuid::new_v4();
        let (session, _rx) = Session::new(me, 8);
        let first = RoomId::for_participants(me, Uuid::new_v4(), None);
        let second = RoomId::for_participants(me, Uuid::new_v4(), Some(Uuid::new_v4()));

        registry.join(&first, &session);
        registry.join(&second, &session);

        let mut left = registry.leave_all(&session);
        left.sort();
        let mut expected = vec![first, second];
        expected.sort();

        assert_eq!(left, expected);
        assert_eq!(registry.room_count(), 0);
        assert!(session.joined_rooms().is_empty());
    }
}
