use dashmap::DashMap;
use uuid::Uuid;

use motorchat_types::RoomId;

#[derive(Debug, Clone, Copy)]
struct Indicator {
    active: bool,
    generation: u64,
}

/// Typing indicators per (room, user).
///
/// Every `start` bumps a generation counter; an expiry timer only clears the
/// indicator if it still holds the generation it was scheduled for. `stop`
/// keeps the entry so the counter never goes backwards; the entry is dropped
/// once the timer for its latest generation fires.
#[derive(Default)]
pub struct TypingTracker {
    indicators: DashMap<(RoomId, Uuid), Indicator>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the indicator just went active, and the generation an
    /// expiry timer for this start should carry.
    pub fn start(&self, room: &RoomId, user_id: Uuid) -> (bool, u64) {
        let mut entry = self
            .indicators
            .entry((room.clone(), user_id))
            .or_insert(Indicator {
                active: false,
                generation: 0,
            });
        let newly = !entry.active;
        entry.active = true;
        entry.generation += 1;
        (newly, entry.generation)
    }

    /// Clear the indicator. Returns whether it was active.
    pub fn stop(&self, room: &RoomId, user_id: Uuid) -> bool {
        match self.indicators.get_mut(&(room.clone(), user_id)) {
            Some(mut indicator) => std::mem::replace(&mut indicator.active, false),
            None => false,
        }
    }

    /// Clear the indicator if no start happened since `generation`. Returns
    /// whether an active indicator was cleared.
    pub fn expire(&self, room: &RoomId, user_id: Uuid, generation: u64) -> bool {
        self.indicators
            .remove_if(&(room.clone(), user_id), |_, indicator| indicator.generation == generation)
            .is_some_and(|(_, indicator)| indicator.active)
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_typing(&self, room: &RoomId, user_id: Uuid) -> bool {
        self.indicators
            .get(&(room.clone(), user_id))
            .is_some_and(|indicator| indicator.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::for_participants(Uuid::new_v4(), Uuid::new_v4(), None)
    }

    #[test]
    fn only_first_start_is_an_edge() {
        let typing = TypingTracker::new();
        let (room, user) = (room(), Uuid::new_v4());

        assert_eq!(typing.start(&room, user), (true, 1));
        assert_eq!(typing.start(&room, user), (false, 2));
        assert!(typing.is_typing(&room, user));

        assert!(typing.stop(&room, user));
        assert!(!typing.stop(&room, user));
        assert!(!typing.is_typing(&room, user));
    }

    #[test]
    fn stale_expiry_is_ignored() {
        let typing = TypingTracker::new();
        let (room, user) = (room(), Uuid::new_v4());

        let (_, first) = typing.start(&room, user);
        let (_, second) = typing.start(&room, user);

        assert!(!typing.expire(&room, user, first));
        assert!(typing.is_typing(&room, user));
        assert!(typing.expire(&room, user, second));
        assert!(!typing.is_typing(&room, user));
        assert!(!typing.expire(&room, user, second));
    }

    #[test]
    fn timer_from_before_a_stop_does_not_cut_the_next_start_short() {
        let typing = TypingTracker::new();
        let (room, user) = (room(), Uuid::new_v4());

        let (_, before_stop) = typing.start(&room, user);
        assert!(typing.stop(&room, user));
        let (newly, after_stop) = typing.start(&room, user);
        assert!(newly);
        assert!(after_stop > before_stop);

        assert!(!typing.expire(&room, user, before_stop));
        assert!(typing.is_typing(&room, user));
        assert!(typing.expire(&room, user, after_stop));
        assert_eq!(typing.tracked(), 0);
    }

    #[test]
    fn stopped_entry_is_dropped_by_its_last_timer() {
        let typing = TypingTracker::new();
        let (room, user) = (room(), Uuid::new_v4());

        let (_, generation) = typing.start(&room, user);
        assert!(typing.stop(&room, user));
        assert_eq!(typing.tracked(), 1);

        assert!(!typing.expire(&room, user, generation));
        assert_eq!(typing.tracked(), 0);
    }
}
