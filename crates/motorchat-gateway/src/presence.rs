use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use motorchat_types::models::{PresenceRecord, PresenceStatus};

#[derive(Debug, Default)]
struct PresenceEntry {
    sessions: usize,
    last_seen: Option<DateTime<Utc>>,
}

/// Counts live sessions per user. Only the first open and the last close
/// are reported, so multi-device users do not flap.
///
/// Offline users keep their entry so `last_seen` survives the disconnect,
/// until `prune_offline` evicts it.
#[derive(Default)]
pub struct PresenceTracker {
    users: DashMap<Uuid, PresenceEntry>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new record when the user just came online.
    pub fn session_opened(&self, user_id: Uuid) -> Option<PresenceRecord> {
        let mut entry = self.users.entry(user_id).or_default();
        entry.sessions += 1;
        (entry.sessions == 1).then(|| PresenceRecord {
            user_id,
            status: PresenceStatus::Online,
            last_seen: entry.last_seen,
        })
    }

    /// Returns the new record when the user's last session just closed.
    /// A close with no matching open is ignored.
    pub fn session_closed(&self, user_id: Uuid) -> Option<PresenceRecord> {
        match self.users.entry(user_id) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                if entry.sessions == 0 {
                    return None;
                }
                entry.sessions -= 1;
                if entry.sessions > 0 {
                    return None;
                }
                let now = Utc::now();
                entry.last_seen = Some(now);
                Some(PresenceRecord {
                    user_id,
                    status: PresenceStatus::Offline,
                    last_seen: Some(now),
                })
            }
            Entry::Vacant(_) => None,
        }
    }

    pub fn status(&self, user_id: Uuid) -> PresenceRecord {
        match self.users.get(&user_id) {
            Some(entry) => PresenceRecord {
                user_id,
                status: if entry.sessions > 0 {
                    PresenceStatus::Online
                } else {
                    PresenceStatus::Offline
                },
                last_seen: entry.last_seen,
            },
            None => PresenceRecord {
                user_id,
                status: PresenceStatus::Offline,
                last_seen: None,
            },
        }
    }

    pub fn live_sessions(&self, user_id: Uuid) -> usize {
        self.users.get(&user_id).map_or(0, |entry| entry.sessions)
    }

    /// Forget offline users last seen before `cutoff`. Returns how many
    /// entries were removed.
    pub fn prune_offline(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.users.retain(|_, entry| {
            let keep = entry.sessions > 0 || entry.last_seen.is_some_and(|seen| seen >= cutoff);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_edges_are_reported() {
        let presence = PresenceTracker::new();
        let user = Uuid::new_v4();

        let online = presence.session_opened(user).unwrap();
        assert_eq!(online.status, PresenceStatus::Online);
        assert!(presence.session_opened(user).is_none());
        assert_eq!(presence.live_sessions(user), 2);

        assert!(presence.session_closed(user).is_none());
        let offline = presence.session_closed(user).unwrap();
        assert_eq!(offline.status, PresenceStatus::Offline);
        assert!(offline.last_seen.is_some());
        assert_eq!(presence.status(user), offline);
    }

    #[test]
    fn unmatched_close_is_ignored() {
        let presence = PresenceTracker::new();
        let user = Uuid::new_v4();

        assert!(presence.session_closed(user).is_none());
        presence.session_opened(user);
        presence.session_closed(user);
        assert!(presence.session_closed(user).is_none());
        assert_eq!(presence.live_sessions(user), 0);
    }

    #[test]
    fn interleavings_emit_one_transition_per_edge() {
        // Any sequence of opens followed by closes crosses each edge once.
        for sessions in 1..=5 {
            let presence = PresenceTracker::new();
            let user = Uuid::new_v4();

            let opened = (0..sessions).filter_map(|_| presence.session_opened(user)).count();
            let closed = (0..sessions + 1).filter_map(|_| presence.session_closed(user)).count();

            assert_eq!((opened, closed), (1, 1), "sessions = {sessions}");
        }
    }

    #[test]
    fn pruning_forgets_only_stale_offline_users() {
        let presence = PresenceTracker::new();
        let (online, offline) = (Uuid::new_v4(), Uuid::new_v4());
        presence.session_opened(online);
        presence.session_opened(offline);
        presence.session_closed(offline);

        assert_eq!(presence.prune_offline(Utc::now() - chrono::Duration::hours(1)), 0);
        assert!(presence.status(offline).last_seen.is_some());

        assert_eq!(presence.prune_offline(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(presence.status(offline).last_seen.is_none());
        assert_eq!(presence.status(online).status, PresenceStatus::Online);
    }

    #[test]
    fn unknown_user_is_offline_without_last_seen() {
        let presence = PresenceTracker::new();
        let record = presence.status(Uuid::new_v4());
        assert_eq!(record.status, PresenceStatus::Offline);
        assert!(record.last_seen.is_none());
    }
}
