//! Shared primitives for the Tandem watch-together relay.
//!
//! The relay server and the playback clients both speak the envelopes defined
//! in [`protocol`]; [`command`] describes the control strings that travel
//! inside a `SEND_MESSAGE` payload.

pub mod command;
pub mod protocol;

pub use command::{CommandError, PlaybackCommand};
pub use protocol::{ClientEnvelope, ProtocolError, ServerEnvelope};

use uuid::Uuid;

/// Mint a fresh session identifier for `CREATE_SESSION`.
pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}
