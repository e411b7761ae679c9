//! Client-side half of the Tandem relay protocol.
//!
//! [`SessionMessenger`] composes outbound envelopes and runs every playback
//! control through an [`EchoGuard`] so a remotely-triggered action is not sent
//! straight back to the relay. [`PlaybackSync`] ties the messenger to a
//! [`VideoPlayer`] and the [`ClientState`] reducer; [`RelayClient`] carries the
//! envelopes over a WebSocket.

pub mod connection;
pub mod echo_guard;
pub mod error;
pub mod messenger;
pub mod player;
pub mod state;

pub use connection::RelayClient;
pub use echo_guard::{EchoGuard, Gate, GuardEvent, GuardState};
pub use error::ClientError;
pub use messenger::{EnvelopeSink, SessionMessenger};
pub use player::{PlayerError, VideoPlayer};
pub use state::{ClientEvent, ClientState, PlaybackSync};
pub use tandem_core::{ClientEnvelope, PlaybackCommand, ServerEnvelope};
