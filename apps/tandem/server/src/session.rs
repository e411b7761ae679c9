use std::collections::HashMap;

use tandem_core::ServerEnvelope;
use thiserror::Error;

use crate::connection::{ConnectionHandle, ConnectionId, Delivery};

/// One watch-together group: user id to the connection currently bound to it.
///
/// The member map is never empty while the session is stored in a
/// [`SessionTable`].
#[derive(Debug)]
pub struct Session {
    members: HashMap<String, ConnectionHandle>,
}

/// Tally of one or more deliveries, including the connections whose buffers
/// overflowed and must be evicted once the table lock is released.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastMetrics {
    pub delivered: usize,
    pub closed: usize,
    pub overflowed: Vec<ConnectionId>,
}

impl BroadcastMetrics {
    pub fn record(&mut self, connection_id: ConnectionId, delivery: Delivery) {
        match delivery {
            Delivery::Sent => self.delivered += 1,
            Delivery::Overflowed => self.overflowed.push(connection_id),
            Delivery::Closed => self.closed += 1,
        }
    }

    pub fn merge(&mut self, other: BroadcastMetrics) {
        self.delivered += other.delivered;
        self.closed += other.closed;
        self.overflowed.extend(other.overflowed);
    }
}

impl Session {
    fn with_member(user_id: String, handle: ConnectionHandle) -> Self {
        let mut members = HashMap::new();
        members.insert(user_id, handle);
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    /// Deliver to every member.
    pub fn broadcast(&self, envelope: &ServerEnvelope) -> BroadcastMetrics {
        let mut metrics = BroadcastMetrics::default();
        for handle in self.members.values() {
            metrics.record(handle.id(), handle.deliver(envelope.clone()));
        }
        metrics
    }

    /// Deliver to every member except `sender_user_id`.
    pub fn broadcast_except(
        &self,
        sender_user_id: &str,
        envelope: &ServerEnvelope,
    ) -> BroadcastMetrics {
        let mut metrics = BroadcastMetrics::default();
        for (user_id, handle) in &self.members {
            if user_id == sender_user_id {
                continue;
            }
            metrics.record(handle.id(), handle.deliver(envelope.clone()));
        }
        metrics
    }

    pub fn user_count(&self) -> ServerEnvelope {
        ServerEnvelope::UserCount { count: self.len() }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} already exists")]
    AlreadyExists(String),
    #[error("session {0} does not exist")]
    NotFound(String),
}

/// Result of releasing a `(session, user)` binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The session or user was already gone.
    NotMember,
    /// The user is now bound to a different connection; nothing was removed.
    Rebound,
    /// The last member left and the session was deleted.
    Emptied,
    /// The user was removed; this many members remain.
    Remaining(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub members: usize,
}

/// All live sessions. Not synchronized on its own: the relay keeps it behind a
/// single lock so existence checks and mutations are serialized.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        session_id: &str,
        user_id: &str,
        handle: ConnectionHandle,
    ) -> Result<&Session, SessionError> {
        if self.sessions.contains_key(session_id) {
            return Err(SessionError::AlreadyExists(session_id.to_string()));
        }
        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::with_member(user_id.to_string(), handle));
        Ok(&*session)
    }

    /// Bind `user_id` to `handle` in an existing session. A previous binding
    /// for the same user id is replaced and returned.
    pub fn join(
        &mut self,
        session_id: &str,
        user_id: &str,
        handle: ConnectionHandle,
    ) -> Result<(&Session, Option<ConnectionHandle>), SessionError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let replaced = session.members.insert(user_id.to_string(), handle);
        Ok((&*session, replaced))
    }

    /// Release `user_id` from `session_id` if it is still bound to
    /// `connection_id`. Deletes the session when it becomes empty.
    pub fn remove_member(
        &mut self,
        session_id: &str,
        user_id: &str,
        connection_id: ConnectionId,
    ) -> Removal {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return Removal::NotMember;
        };
        match session.members.get(user_id) {
            None => return Removal::NotMember,
            Some(bound) if bound.id() != connection_id => return Removal::Rebound,
            Some(_) => {}
        }

        session.members.remove(user_id);
        if session.is_empty() {
            self.sessions.remove(session_id);
            Removal::Emptied
        } else {
            Removal::Remaining(session.len())
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut snapshot: Vec<_> = self
            .sessions
            .iter()
            .map(|(session_id, session)| SessionSnapshot {
                session_id: session_id.clone(),
                members: session.len(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        snapshot
    }
}
