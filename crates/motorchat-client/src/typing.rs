use std::time::{Duration, Instant};

use motorchat_types::RoomId;
use motorchat_types::events::{ClientCommand, TypingPayload};

/// Quiet period after the last keystroke before `typing:stop` is sent.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(3);

/// Debounces keystrokes into `typing:start` / `typing:stop` commands for one
/// conversation. Callers drive it with their own clock.
#[derive(Debug, Clone)]
pub struct TypingNotifier {
    room: RoomId,
    idle: Duration,
    last_keystroke: Option<Instant>,
}

impl TypingNotifier {
    pub fn new(room: RoomId) -> Self {
        Self {
            room,
            idle: DEFAULT_TYPING_IDLE,
            last_keystroke: None,
        }
    }

    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    pub fn is_active(&self) -> bool {
        self.last_keystroke.is_some()
    }

    /// Only the first keystroke after idle produces a command.
    pub fn keystroke(&mut self, now: Instant) -> Option<ClientCommand> {
        let was_active = self.last_keystroke.replace(now).is_some();
        (!was_active).then(|| ClientCommand::TypingStart(self.payload()))
    }

    /// Call periodically; yields `typing:stop` once the idle period has passed.
    pub fn tick(&mut self, now: Instant) -> Option<ClientCommand> {
        let last = self.last_keystroke?;
        if now.saturating_duration_since(last) < self.idle {
            return None;
        }
        self.last_keystroke = None;
        Some(ClientCommand::TypingStop(self.payload()))
    }

    /// The message went out, so typing is over.
    pub fn sent(&mut self) -> Option<ClientCommand> {
        self.last_keystroke.take()?;
        Some(ClientCommand::TypingStop(self.payload()))
    }

    fn payload(&self) -> TypingPayload {
        TypingPayload {
            conversation_id: self.room.clone(),
            user_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn notifier() -> TypingNotifier {
        TypingNotifier::new(RoomId::for_participants(Uuid::new_v4(), Uuid::new_v4(), None))
    }

    #[test]
    fn burst_of_keystrokes_sends_one_start_and_one_stop() {
        let mut typing = notifier();
        let t0 = Instant::now();

        assert!(matches!(typing.keystroke(t0), Some(ClientCommand::TypingStart(_))));
        assert!(typing.keystroke(t0 + Duration::from_millis(500)).is_none());
        assert!(typing.keystroke(t0 + Duration::from_secs(2)).is_none());

        // Idle is measured from the last keystroke.
        assert!(typing.tick(t0 + Duration::from_secs(4)).is_none());
        assert!(matches!(
            typing.tick(t0 + Duration::from_secs(5)),
            Some(ClientCommand::TypingStop(_))
        ));
        assert!(typing.tick(t0 + Duration::from_secs(9)).is_none());
        assert!(!typing.is_active());
    }

    #[test]
    fn sending_stops_typing() {
        let mut typing = notifier().with_idle(Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(typing.sent().is_none());
        typing.keystroke(t0);
        assert!(matches!(typing.sent(), Some(ClientCommand::TypingStop(_))));
        assert!(matches!(
            typing.keystroke(t0 + Duration::from_secs(1)),
            Some(ClientCommand::TypingStart(_))
        ));
    }
}
