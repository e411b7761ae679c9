use std::{collections::HashSet, fmt, sync::Arc};

use dashmap::DashMap;
use tandem_core::ServerEnvelope;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Notify,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RelayError;

/// Server-assigned identity of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outbound side of a connection. Cheap to clone; sessions hold these by
/// reference semantics and never own the transport.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<ServerEnvelope>,
    overflow: Arc<Notify>,
}

/// Outcome of a single fire-and-forget delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The peer's buffer was full. The envelope was not queued and the
    /// connection has to be evicted.
    Overflowed,
    /// The writer task is gone; cleanup will follow from the reader side.
    Closed,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, sender: mpsc::Sender<ServerEnvelope>) -> Self {
        Self {
            id,
            sender,
            overflow: Arc::new(Notify::new()),
        }
    }

    /// Create a handle together with the receiver its writer task drains.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<ServerEnvelope>) {
        let (tx, rx) = mpsc::channel(depth);
        (Self::new(ConnectionId::new(), tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Fires once an envelope could not be queued. The socket task waits on
    /// it and closes the transport.
    pub fn overflow_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.overflow)
    }

    pub fn deliver(&self, envelope: ServerEnvelope) -> Delivery {
        match self.sender.try_send(envelope) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %self.id, "outbound buffer full; evicting connection");
                self.overflow.notify_one();
                Delivery::Overflowed
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %self.id, "delivery to closed connection skipped");
                Delivery::Closed
            }
        }
    }
}

/// A `(session, user)` binding a connection has to release when it closes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Membership {
    pub session_id: String,
    pub user_id: String,
}

impl Membership {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }
}

struct ConnectionEntry {
    handle: ConnectionHandle,
    memberships: HashSet<Membership>,
}

/// Live transport connections, independent of any session bookkeeping.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ConnectionHandle) {
        self.connections.insert(
            handle.id(),
            ConnectionEntry {
                handle,
                memberships: HashSet::new(),
            },
        );
    }

    /// Record a cleanup hook: when `connection_id` closes, `membership` is
    /// handed back by [`ConnectionRegistry::unregister`].
    pub fn track_membership(
        &self,
        connection_id: ConnectionId,
        membership: Membership,
    ) -> Result<(), RelayError> {
        let mut entry = self
            .connections
            .get_mut(&connection_id)
            .ok_or(RelayError::UnknownConnection(connection_id))?;
        entry.memberships.insert(membership);
        Ok(())
    }

    /// Remove the connection and return its memberships. Only the first call
    /// for a given id returns anything.
    pub fn unregister(&self, connection_id: ConnectionId) -> Vec<Membership> {
        match self.connections.remove(&connection_id) {
            Some((_, entry)) => {
                let mut memberships: Vec<_> = entry.memberships.into_iter().collect();
                memberships.sort();
                memberships
            }
            None => Vec::new(),
        }
    }

    pub fn handle(&self, connection_id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.handle.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
