//! JSON envelopes exchanged between playback clients and the relay.
//!
//! Every envelope is an object carrying a `type` discriminator. Field names
//! follow the browser client's camelCase convention.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEnvelope {
    /// Open a new session under a caller-chosen id.
    CreateSession {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// Join an existing session.
    JoinSession {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// Relay an opaque payload to the other members of a session.
    SendMessage {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        message: String,
    },
    /// Any `type` the relay does not understand.
    #[serde(other)]
    Unknown,
}

impl ClientEnvelope {
    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEnvelope::CreateSession { .. } => "CREATE_SESSION",
            ClientEnvelope::JoinSession { .. } => "JOIN_SESSION",
            ClientEnvelope::SendMessage { .. } => "SEND_MESSAGE",
            ClientEnvelope::Unknown => "UNKNOWN",
        }
    }
}

/// Messages sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEnvelope {
    CreatedSessionSuccessfully {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    CreateSessionFailure,
    JoinedSessionSuccessfully {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    JoinSessionFailure,
    /// A payload forwarded from another member of the session.
    ServerMessage { message: String },
    /// Current number of members in the session.
    UserCount { count: usize },
}

/// Errors raised while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ProtocolError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            ProtocolError::NotUtf8(_) => "not_utf8",
            ProtocolError::Malformed(_) => "malformed",
        }
    }
}

impl ClientEnvelope {
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Binary frames are accepted when they carry UTF-8 JSON.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_text(std::str::from_utf8(bytes)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerEnvelope {
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_text(std::str::from_utf8(bytes)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
