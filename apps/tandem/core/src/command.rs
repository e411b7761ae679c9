use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const PLAY: &str = "PLAY";
const PAUSE: &str = "PAUSE";
const SEEK_PREFIX: &str = "SEEK ";

/// Playback control carried in a `SEND_MESSAGE` / `SERVER_MESSAGE` payload.
///
/// The wire form is `PLAY`, `PAUSE` or `SEEK <seconds>` where `<seconds>` is a
/// non-negative decimal such as `12.5`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackCommand {
    Play,
    Pause,
    Seek(f64),
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unrecognised playback command: {0:?}")]
    Unrecognised(String),
    #[error("invalid seek timestamp: {0:?}")]
    InvalidTimestamp(String),
}

impl PlaybackCommand {
    pub fn parse(message: &str) -> Result<Self, CommandError> {
        match message {
            PLAY => Ok(PlaybackCommand::Play),
            PAUSE => Ok(PlaybackCommand::Pause),
            _ => match message.strip_prefix(SEEK_PREFIX) {
                Some(raw) => parse_timestamp(raw).map(PlaybackCommand::Seek),
                None => Err(CommandError::Unrecognised(message.to_string())),
            },
        }
    }
}

// Digits with at most one decimal point; signs, exponents and NaN are refused.
fn parse_timestamp(raw: &str) -> Result<f64, CommandError> {
    let invalid = || CommandError::InvalidTimestamp(raw.to_string());
    let well_formed = raw.chars().any(|c| c.is_ascii_digit())
        && raw.chars().all(|c| c.is_ascii_digit() || c == '.')
        && raw.matches('.').count() <= 1;
    if !well_formed {
        return Err(invalid());
    }
    raw.parse::<f64>().map_err(|_| invalid())
}

impl FromStr for PlaybackCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PlaybackCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackCommand::Play => f.write_str(PLAY),
            PlaybackCommand::Pause => f.write_str(PAUSE),
            PlaybackCommand::Seek(time) => write!(f, "{SEEK_PREFIX}{time}"),
        }
    }
}
