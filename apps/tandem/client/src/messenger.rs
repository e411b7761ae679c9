use tandem_core::{generate_session_id, ClientEnvelope, PlaybackCommand};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{echo_guard::EchoGuard, error::ClientError};

/// Destination for outbound envelopes.
pub trait EnvelopeSink {
    fn send_envelope(&mut self, envelope: ClientEnvelope) -> Result<(), ClientError>;
}

impl EnvelopeSink for mpsc::UnboundedSender<ClientEnvelope> {
    fn send_envelope(&mut self, envelope: ClientEnvelope) -> Result<(), ClientError> {
        self.send(envelope).map_err(|_| ClientError::Closed)
    }
}

/// Collects envelopes in memory.
impl EnvelopeSink for Vec<ClientEnvelope> {
    fn send_envelope(&mut self, envelope: ClientEnvelope) -> Result<(), ClientError> {
        self.push(envelope);
        Ok(())
    }
}

/// Composes client envelopes; playback controls pass through the echo guard.
#[derive(Debug)]
pub struct SessionMessenger<S> {
    sink: S,
    guard: EchoGuard,
}

impl<S: EnvelopeSink> SessionMessenger<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            guard: EchoGuard::new(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Swallow the next playback control; called right before a remote
    /// command is applied to the player.
    pub fn note_remote_applied(&mut self) {
        self.guard.suppress_next();
    }

    /// Undo [`Self::note_remote_applied`] when the player refused the command.
    pub fn note_remote_aborted(&mut self) {
        self.guard.rearm();
    }

    pub fn send_play(&mut self, session_id: &str, user_id: &str) -> Result<bool, ClientError> {
        self.send_command(PlaybackCommand::Play, session_id, user_id)
    }

    pub fn send_pause(&mut self, session_id: &str, user_id: &str) -> Result<bool, ClientError> {
        self.send_command(PlaybackCommand::Pause, session_id, user_id)
    }

    pub fn send_seek(
        &mut self,
        session_id: &str,
        user_id: &str,
        seconds: f64,
    ) -> Result<bool, ClientError> {
        self.send_command(PlaybackCommand::Seek(seconds), session_id, user_id)
    }

    /// Returns `Ok(false)` when the guard swallowed the command.
    pub fn send_command(
        &mut self,
        command: PlaybackCommand,
        session_id: &str,
        user_id: &str,
    ) -> Result<bool, ClientError> {
        if !self.guard.admit_local() {
            debug!(%command, "suppressed echo of remote command");
            return Ok(false);
        }
        self.sink.send_envelope(ClientEnvelope::SendMessage {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            message: command.to_string(),
        })?;
        Ok(true)
    }

    /// Request a new session under a freshly minted id, which is returned.
    pub fn create_session(&mut self, user_id: &str) -> Result<String, ClientError> {
        let session_id = generate_session_id();
        self.sink.send_envelope(ClientEnvelope::CreateSession {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
        })?;
        Ok(session_id)
    }

    pub fn join_session(&mut self, session_id: &str, user_id: &str) -> Result<(), ClientError> {
        self.sink.send_envelope(ClientEnvelope::JoinSession {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messenger() -> SessionMessenger<Vec<ClientEnvelope>> {
        SessionMessenger::new(Vec::new())
    }

    #[test_timeout::timeout]
    fn controls_become_send_message_envelopes() {
        let mut messenger = messenger();
        assert!(messenger.send_play("s1", "u1").unwrap());
        assert!(messenger.send_pause("s1", "u1").unwrap());
        assert!(messenger.send_seek("s1", "u1", 61.5).unwrap());

        let messages: Vec<_> = messenger
            .sink()
            .iter()
            .map(|envelope| match envelope {
                ClientEnvelope::SendMessage {
                    session_id,
                    user_id,
                    message,
                } => {
                    assert_eq!((session_id.as_str(), user_id.as_str()), ("s1", "u1"));
                    message.clone()
                }
                other => panic!("unexpected envelope {other:?}"),
            })
            .collect();
        assert_eq!(messages, ["PLAY", "PAUSE", "SEEK 61.5"]);
    }

    #[test_timeout::timeout]
    fn remote_application_swallows_one_control() {
        let mut messenger = messenger();
        messenger.note_remote_applied();
        assert!(!messenger.send_play("s1", "u1").unwrap());
        assert!(messenger.sink().is_empty());

        assert!(messenger.send_play("s1", "u1").unwrap());
        assert_eq!(messenger.sink().len(), 1);
    }

    #[test_timeout::timeout]
    fn create_session_mints_an_id() {
        let mut messenger = messenger();
        let session_id = messenger.create_session("u1").unwrap();
        messenger.join_session("other", "u1").unwrap();

        assert_eq!(
            messenger.sink().as_slice(),
            [
                ClientEnvelope::CreateSession {
                    session_id,
                    user_id: "u1".into()
                },
                ClientEnvelope::JoinSession {
                    session_id: "other".into(),
                    user_id: "u1".into()
                },
            ]
        );
    }

    #[test_timeout::timeout]
    fn session_calls_do_not_consume_suppression() {
        let mut messenger = messenger();
        messenger.note_remote_applied();
        messenger.join_session("s1", "u1").unwrap();
        assert!(!messenger.send_pause("s1", "u1").unwrap());
    }

    #[test_timeout::timeout]
    fn closed_channel_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut messenger = SessionMessenger::new(tx);
        assert!(matches!(
            messenger.send_play("s1", "u1"),
            Err(ClientError::Closed)
        ));
    }
}
