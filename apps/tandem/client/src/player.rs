use tandem_core::PlaybackCommand;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlayerError {
    /// The media element refused to start, e.g. an autoplay policy.
    #[error("playback was rejected: {0}")]
    Rejected(String),
}

/// The local media element, driven by remote commands.
///
/// Implementations forward the element's own play/pause/seeked notifications
/// to [`crate::PlaybackSync`]'s `on_local_*` methods, including the ones that
/// result from calls made through this trait.
pub trait VideoPlayer {
    fn play(&mut self) -> Result<(), PlayerError>;
    fn pause(&mut self);
    fn set_current_time(&mut self, seconds: f64);
    fn current_time(&self) -> f64;

    fn apply(&mut self, command: PlaybackCommand) -> Result<(), PlayerError> {
        match command {
            PlaybackCommand::Play => self.play(),
            PlaybackCommand::Pause => {
                self.pause();
                Ok(())
            }
            PlaybackCommand::Seek(seconds) => {
                self.set_current_time(seconds);
                Ok(())
            }
        }
    }
}
