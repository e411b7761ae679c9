//! One-shot suppression of echoed playback controls.
//!
//! Applying a remote PLAY/PAUSE/SEEK to the local player makes the player
//! raise the same notification a user action would. Without a guard that
//! notification would be sent back to the relay, and two synchronized clients
//! would bounce the command between them forever.
//!
//! | state      | event          | next       | gate    |
//! |------------|----------------|------------|---------|
//! | Armed      | RemoteApplied  | Suppressed | Idle    |
//! | Armed      | LocalTrigger   | Armed      | Pass    |
//! | Armed      | RemoteAborted  | Armed      | Idle    |
//! | Suppressed | RemoteApplied  | Suppressed | Idle    |
//! | Suppressed | LocalTrigger   | Armed      | Swallow |
//! | Suppressed | RemoteAborted  | Armed      | Idle    |

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardState {
    /// Local triggers are sent.
    #[default]
    Armed,
    /// The next local trigger is dropped.
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardEvent {
    /// A remote command is about to be applied to the player.
    RemoteApplied,
    /// The player reported a play/pause/seek.
    LocalTrigger,
    /// The player refused a remote command, so no local trigger will follow.
    RemoteAborted,
}

/// What happens to the outbound message for this event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Pass,
    Swallow,
    /// The event does not produce an outbound message.
    Idle,
}

impl GuardState {
    pub const fn next(self, event: GuardEvent) -> (GuardState, Gate) {
        match (self, event) {
            (_, GuardEvent::RemoteApplied) => (GuardState::Suppressed, Gate::Idle),
            (GuardState::Armed, GuardEvent::LocalTrigger) => (GuardState::Armed, Gate::Pass),
            (GuardState::Suppressed, GuardEvent::LocalTrigger) => {
                (GuardState::Armed, Gate::Swallow)
            }
            (_, GuardEvent::RemoteAborted) => (GuardState::Armed, Gate::Idle),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EchoGuard {
    state: GuardState,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn handle(&mut self, event: GuardEvent) -> Gate {
        let (next, gate) = self.state.next(event);
        self.state = next;
        gate
    }

    /// Must be called before the remote command reaches the player.
    pub fn suppress_next(&mut self) {
        self.handle(GuardEvent::RemoteApplied);
    }

    pub fn rearm(&mut self) {
        self.handle(GuardEvent::RemoteAborted);
    }

    /// Returns `true` when the local trigger should be sent to the relay.
    pub fn admit_local(&mut self) -> bool {
        self.handle(GuardEvent::LocalTrigger) == Gate::Pass
    }
}
