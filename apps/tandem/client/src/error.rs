use tandem_core::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to relay: {0}")]
    Connect(#[source] tungstenite::Error),
    #[error("timed out connecting to relay")]
    ConnectTimeout,
    #[error("relay connection is closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
