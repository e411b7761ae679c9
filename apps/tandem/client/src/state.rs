use tandem_core::{PlaybackCommand, ServerEnvelope};
use tracing::{debug, warn};

use crate::{
    error::ClientError,
    messenger::{EnvelopeSink, SessionMessenger},
    player::VideoPlayer,
};

/// What the playback UI knows about its relay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    pub connected_to_server: bool,
    pub connected_to_session: bool,
    pub join_session_failure: bool,
    pub create_session_failure: bool,
    pub session_id: String,
    pub user_id: String,
    pub user_count: usize,
}

impl ClientState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            connected_to_server: false,
            connected_to_session: false,
            join_session_failure: false,
            create_session_failure: false,
            session_id: String::new(),
            user_id: user_id.into(),
            user_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The socket to the relay opened.
    ConnectedToServer,
    Server(ServerEnvelope),
}

impl From<ServerEnvelope> for ClientEvent {
    fn from(envelope: ServerEnvelope) -> Self {
        ClientEvent::Server(envelope)
    }
}

/// Pure state transition. `SERVER_MESSAGE` leaves the state untouched; its
/// side effect on the player lives in [`PlaybackSync::handle`].
pub fn reduce(state: ClientState, event: &ClientEvent) -> ClientState {
    match event {
        ClientEvent::ConnectedToServer => ClientState {
            connected_to_server: true,
            ..state
        },
        ClientEvent::Server(envelope) => match envelope {
            ServerEnvelope::CreatedSessionSuccessfully { session_id }
            | ServerEnvelope::JoinedSessionSuccessfully { session_id } => ClientState {
                connected_to_session: true,
                join_session_failure: false,
                create_session_failure: false,
                session_id: session_id.clone(),
                ..state
            },
            ServerEnvelope::CreateSessionFailure => ClientState {
                create_session_failure: true,
                ..state
            },
            ServerEnvelope::JoinSessionFailure => ClientState {
                join_session_failure: true,
                ..state
            },
            ServerEnvelope::UserCount { count } => ClientState {
                user_count: *count,
                ..state
            },
            ServerEnvelope::ServerMessage { .. } => state,
        },
    }
}

/// Keeps a local player in step with the relay.
pub struct PlaybackSync<P, S> {
    state: ClientState,
    player: P,
    messenger: SessionMessenger<S>,
}

impl<P: VideoPlayer, S: EnvelopeSink> PlaybackSync<P, S> {
    pub fn new(state: ClientState, player: P, sink: S) -> Self {
        Self {
            state,
            player,
            messenger: SessionMessenger::new(sink),
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    pub fn messenger(&self) -> &SessionMessenger<S> {
        &self.messenger
    }

    pub fn handle(&mut self, event: ClientEvent) {
        if let ClientEvent::Server(ServerEnvelope::ServerMessage { message }) = &event {
            self.apply_remote(message);
        }
        self.state = reduce(self.state.clone(), &event);
    }

    fn apply_remote(&mut self, message: &str) {
        let command = match PlaybackCommand::parse(message) {
            Ok(command) => command,
            Err(err) => {
                debug!(error = %err, "ignoring unrecognised server message");
                return;
            }
        };

        self.messenger.note_remote_applied();
        if let Err(err) = self.player.apply(command) {
            warn!(%command, error = %err, "player rejected remote command");
            self.messenger.note_remote_aborted();
        }
    }

    pub fn create_session(&mut self) -> Result<String, ClientError> {
        let user_id = self.state.user_id.clone();
        self.messenger.create_session(&user_id)
    }

    pub fn join_session(&mut self, session_id: &str) -> Result<(), ClientError> {
        let user_id = self.state.user_id.clone();
        self.messenger.join_session(session_id, &user_id)
    }

    /// The player started playing. Returns whether a message was sent.
    pub fn on_local_play(&mut self) -> Result<bool, ClientError> {
        self.on_local(PlaybackCommand::Play)
    }

    pub fn on_local_pause(&mut self) -> Result<bool, ClientError> {
        self.on_local(PlaybackCommand::Pause)
    }

    /// The player finished seeking; the target is read from the player.
    pub fn on_local_seek(&mut self) -> Result<bool, ClientError> {
        let seconds = self.player.current_time();
        self.on_local(PlaybackCommand::Seek(seconds))
    }

    fn on_local(&mut self, command: PlaybackCommand) -> Result<bool, ClientError> {
        if !self.state.connected_to_session {
            return Ok(false);
        }
        let ClientState {
            session_id,
            user_id,
            ..
        } = &self.state;
        self.messenger.send_command(command, session_id, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerError;
    use tandem_core::ClientEnvelope;

    #[derive(Default)]
    struct FakePlayer {
        calls: Vec<String>,
        time: f64,
        reject_play: bool,
    }

    impl VideoPlayer for FakePlayer {
        fn play(&mut self) -> Result<(), PlayerError> {
            self.calls.push("play".into());
            if self.reject_play {
                return Err(PlayerError::Rejected("autoplay".into()));
            }
            Ok(())
        }

        fn pause(&mut self) {
            self.calls.push("pause".into());
        }

        fn set_current_time(&mut self, seconds: f64) {
            self.calls.push(format!("seek {seconds}"));
            self.time = seconds;
        }

        fn current_time(&self) -> f64 {
            self.time
        }
    }

    fn joined(player: FakePlayer) -> PlaybackSync<FakePlayer, Vec<ClientEnvelope>> {
        let mut sync = PlaybackSync::new(ClientState::new("u1"), player, Vec::new());
        sync.handle(ClientEvent::ConnectedToServer);
        sync.handle(
            ServerEnvelope::JoinedSessionSuccessfully {
                session_id: "s1".into(),
            }
            .into(),
        );
        sync
    }

    fn sent(sync: &PlaybackSync<FakePlayer, Vec<ClientEnvelope>>) -> Vec<String> {
        sync.messenger()
            .sink()
            .iter()
            .filter_map(|envelope| match envelope {
                ClientEnvelope::SendMessage { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test_timeout::timeout]
    fn reducer_tracks_session_lifecycle() {
        let state = ClientState::new("u1");
        let state = reduce(state, &ClientEvent::ConnectedToServer);
        assert!(state.connected_to_server);

        let state = reduce(state, &ServerEnvelope::JoinSessionFailure.into());
        let state = reduce(state, &ServerEnvelope::CreateSessionFailure.into());
        assert!(state.join_session_failure && state.create_session_failure);
        assert!(!state.connected_to_session);

        let state = reduce(
            state,
            &ServerEnvelope::CreatedSessionSuccessfully {
                session_id: "abc".into(),
            }
            .into(),
        );
        assert!(state.connected_to_session);
        assert_eq!(state.session_id, "abc");
        assert!(!state.join_session_failure && !state.create_session_failure);

        let state = reduce(state, &ServerEnvelope::UserCount { count: 2 }.into());
        assert_eq!(state.user_count, 2);
        assert_eq!(state.user_id, "u1");
    }

    #[test_timeout::timeout]
    fn remote_play_is_applied_but_not_echoed() {
        let mut sync = joined(FakePlayer::default());

        sync.handle(
            ServerEnvelope::ServerMessage {
                message: "PLAY".into(),
            }
            .into(),
        );
        assert_eq!(sync.player().calls, ["play"]);

        // The element reports the play it just performed.
        assert!(!sync.on_local_play().unwrap());
        assert!(sent(&sync).is_empty());

        // A genuine user action afterwards goes out exactly once.
        assert!(sync.on_local_play().unwrap());
        assert_eq!(sent(&sync), ["PLAY"]);
    }

    #[test_timeout::timeout]
    fn remote_seek_moves_the_player() {
        let mut sync = joined(FakePlayer::default());
        sync.handle(
            ServerEnvelope::ServerMessage {
                message: "SEEK 12.5".into(),
            }
            .into(),
        );
        assert_eq!(sync.player().current_time(), 12.5);
        assert!(!sync.on_local_seek().unwrap());

        sync.player_mut().set_current_time(30.0);
        assert!(sync.on_local_seek().unwrap());
        assert_eq!(sent(&sync), ["SEEK 30"]);
    }

    #[test_timeout::timeout]
    fn malformed_remote_commands_leave_the_guard_armed() {
        let mut sync = joined(FakePlayer::default());
        sync.handle(
            ServerEnvelope::ServerMessage {
                message: "SEEK soon".into(),
            }
            .into(),
        );
        assert!(sync.player().calls.is_empty());
        assert!(sync.on_local_pause().unwrap());
        assert_eq!(sent(&sync), ["PAUSE"]);
    }

    #[test_timeout::timeout]
    fn rejected_play_rearms_the_guard() {
        let mut sync = joined(FakePlayer {
            reject_play: true,
            ..FakePlayer::default()
        });
        sync.handle(
            ServerEnvelope::ServerMessage {
                message: "PLAY".into(),
            }
            .into(),
        );
        assert_eq!(sync.player().calls, ["play"]);
        assert!(sync.on_local_pause().unwrap());
    }

    #[test_timeout::timeout]
    fn local_actions_outside_a_session_are_not_sent() {
        let mut sync = PlaybackSync::new(ClientState::new("u1"), FakePlayer::default(), Vec::new());
        assert!(!sync.on_local_play().unwrap());
        assert!(sync.messenger().sink().is_empty());
    }

    #[test_timeout::timeout]
    fn create_session_uses_state_user_id() {
        let mut sync = PlaybackSync::new(ClientState::new("u9"), FakePlayer::default(), Vec::new());
        let session_id = sync.create_session().unwrap();
        assert_eq!(
            sync.messenger().sink().as_slice(),
            [ClientEnvelope::CreateSession {
                session_id,
                user_id: "u9".into()
            }]
        );
    }
}
