use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors surfaced by relay dispatch. None of them are fatal to the server;
/// the websocket loop logs them and keeps the connection open.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("session {session_id} does not exist")]
    UnknownSession { session_id: String },
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

impl RelayError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            RelayError::UnknownSession { .. } => "unknown_session",
            RelayError::UnknownConnection(_) => "unknown_connection",
        }
    }
}
