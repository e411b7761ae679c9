use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tandem_core::{ClientEnvelope, ServerEnvelope};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, Membership},
    error::RelayError,
    session::{BroadcastMetrics, Removal, SessionSnapshot, SessionTable},
};

const DEFAULT_CHANNEL_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Outbound envelopes buffered per connection. A connection that falls
    /// further behind is evicted.
    pub channel_depth: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_depth: DEFAULT_CHANNEL_DEPTH,
        }
    }
}

/// What a dispatched envelope ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created { members: usize },
    CreateRejected,
    Joined { members: usize },
    JoinRejected,
    Forwarded { delivered: usize },
    Ignored,
}

#[derive(Debug, Clone)]
pub struct RelayStats {
    pub active_connections: usize,
    pub sessions: Vec<SessionSnapshot>,
}

/// Session relay: owns the session table and mediates all cross-connection
/// traffic.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    sessions: Mutex<SessionTable>,
    connections: ConnectionRegistry,
    config: RelayConfig,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                sessions: Mutex::new(SessionTable::new()),
                connections: ConnectionRegistry::new(),
                config,
            }),
        }
    }

    /// Register a new transport connection. The returned receiver must be
    /// drained by the connection's writer.
    pub fn connect(&self) -> (ConnectionHandle, mpsc::Receiver<ServerEnvelope>) {
        let (handle, rx) = ConnectionHandle::channel(self.inner.config.channel_depth);
        self.inner.connections.register(handle.clone());
        counter!("tandem_relay_connections_total", 1);
        gauge!(
            "tandem_relay_connections_active",
            self.inner.connections.len() as f64
        );
        (handle, rx)
    }

    /// Route one inbound envelope to its handler.
    pub fn dispatch(
        &self,
        connection_id: ConnectionId,
        envelope: ClientEnvelope,
    ) -> Result<Outcome, RelayError> {
        match envelope {
            ClientEnvelope::CreateSession {
                session_id,
                user_id,
            } => self.create_session(connection_id, &session_id, &user_id),
            ClientEnvelope::JoinSession {
                session_id,
                user_id,
            } => self.join_session(connection_id, &session_id, &user_id),
            ClientEnvelope::SendMessage {
                session_id,
                user_id,
                message,
            } => self
                .send_message(&session_id, &user_id, message)
                .map(|delivered| Outcome::Forwarded { delivered }),
            ClientEnvelope::Unknown => {
                debug!(connection_id = %connection_id, "ignoring envelope with unknown type");
                Ok(Outcome::Ignored)
            }
        }
    }

    pub fn create_session(
        &self,
        connection_id: ConnectionId,
        session_id: &str,
        user_id: &str,
    ) -> Result<Outcome, RelayError> {
        let requester = self.requester(connection_id)?;
        let mut table = self.inner.sessions.lock();
        let mut fanout = BroadcastMetrics::default();

        let outcome = match table.create(session_id, user_id, requester.clone()) {
            Ok(session) => Outcome::Created {
                members: session.len(),
            },
            Err(err) => {
                info!(session_id, user_id, error = %err, "create rejected");
                fanout.record(
                    connection_id,
                    requester.deliver(ServerEnvelope::CreateSessionFailure),
                );
                Outcome::CreateRejected
            }
        };

        if let Outcome::Created { .. } = outcome {
            self.bind(&mut table, connection_id, session_id, user_id)?;
            fanout.record(
                connection_id,
                requester.deliver(ServerEnvelope::CreatedSessionSuccessfully {
                    session_id: session_id.to_string(),
                }),
            );
            fanout.merge(broadcast_user_count(&table, session_id));
            gauge!("tandem_relay_sessions_active", table.len() as f64);
            info!(session_id, user_id, connection_id = %connection_id, "session created");
        }

        drop(table);
        self.evict(fanout.overflowed);
        Ok(outcome)
    }

    pub fn join_session(
        &self,
        connection_id: ConnectionId,
        session_id: &str,
        user_id: &str,
    ) -> Result<Outcome, RelayError> {
        let requester = self.requester(connection_id)?;
        let mut table = self.inner.sessions.lock();
        let mut fanout = BroadcastMetrics::default();

        let outcome = match table.join(session_id, user_id, requester.clone()) {
            Ok((session, replaced)) => {
                if let Some(previous) = replaced.filter(|h| h.id() != connection_id) {
                    warn!(
                        session_id,
                        user_id,
                        previous_connection = %previous.id(),
                        connection_id = %connection_id,
                        "user id rebound to a new connection"
                    );
                }
                Outcome::Joined {
                    members: session.len(),
                }
            }
            Err(err) => {
                info!(session_id, user_id, error = %err, "join rejected");
                fanout.record(
                    connection_id,
                    requester.deliver(ServerEnvelope::JoinSessionFailure),
                );
                Outcome::JoinRejected
            }
        };

        if let Outcome::Joined { members } = outcome {
            self.bind(&mut table, connection_id, session_id, user_id)?;
            fanout.record(
                connection_id,
                requester.deliver(ServerEnvelope::JoinedSessionSuccessfully {
                    session_id: session_id.to_string(),
                }),
            );
            fanout.merge(broadcast_user_count(&table, session_id));
            info!(session_id, user_id, members, "user joined session");
        }

        drop(table);
        self.evict(fanout.overflowed);
        Ok(outcome)
    }

    /// Forward `message` to every member of the session except `user_id`.
    /// Returns how many peers it was delivered to. A peer whose buffer is
    /// full is disconnected rather than left silently out of step.
    pub fn send_message(
        &self,
        session_id: &str,
        user_id: &str,
        message: String,
    ) -> Result<usize, RelayError> {
        let table = self.inner.sessions.lock();
        let Some(session) = table.get(session_id) else {
            warn!(session_id, user_id, "message for unknown session dropped");
            return Err(RelayError::UnknownSession {
                session_id: session_id.to_string(),
            });
        };

        let envelope = ServerEnvelope::ServerMessage { message };
        let metrics = session.broadcast_except(user_id, &envelope);
        drop(table);

        if metrics.delivered > 0 {
            counter!(
                "tandem_relay_messages_forwarded_total",
                metrics.delivered as u64
            );
        }
        debug!(
            session_id,
            user_id,
            delivered = metrics.delivered,
            overflowed = metrics.overflowed.len(),
            "message forwarded"
        );
        self.evict(metrics.overflowed);
        Ok(metrics.delivered)
    }

    /// Release one membership held by a closing connection.
    ///
    /// Only a binding that still points at `connection_id` is removed. When
    /// the user id was rebound by a later join, the stale connection's close
    /// leaves the newer binding alone and reports [`Removal::Rebound`].
    pub fn cleanup(&self, session_id: &str, user_id: &str, connection_id: ConnectionId) -> Removal {
        let mut table = self.inner.sessions.lock();
        let removal = table.remove_member(session_id, user_id, connection_id);
        let mut fanout = BroadcastMetrics::default();
        match removal {
            Removal::Remaining(_) => fanout.merge(broadcast_user_count(&table, session_id)),
            Removal::Emptied => {
                info!(session_id, "session emptied and removed");
                gauge!("tandem_relay_sessions_active", table.len() as f64);
            }
            Removal::Rebound => {
                debug!(session_id, user_id, "membership already rebound; keeping it");
            }
            Removal::NotMember => {}
        }
        drop(table);
        self.evict(fanout.overflowed);
        removal
    }

    /// Tear down a connection and run the cleanup hook for each membership it
    /// registered. Safe to call more than once; only the first call releases.
    pub fn disconnect(&self, connection_id: ConnectionId) -> usize {
        let memberships = self.inner.connections.unregister(connection_id);
        for membership in &memberships {
            self.cleanup(&membership.session_id, &membership.user_id, connection_id);
        }
        gauge!(
            "tandem_relay_connections_active",
            self.inner.connections.len() as f64
        );
        memberships.len()
    }

    pub fn stats(&self) -> RelayStats {
        let sessions = self.inner.sessions.lock().snapshot();
        RelayStats {
            active_connections: self.inner.connections.len(),
            sessions,
        }
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        self.inner.sessions.lock().contains(session_id)
    }

    // Must run without the table lock held; eviction re-enters cleanup.
    fn evict(&self, overflowed: Vec<ConnectionId>) {
        for connection_id in overflowed {
            if self.inner.connections.handle(connection_id).is_none() {
                continue;
            }
            let released = self.disconnect(connection_id);
            counter!("tandem_relay_slow_consumer_evictions_total", 1);
            warn!(
                connection_id = %connection_id,
                memberships_released = released,
                "evicted connection with a full outbound buffer"
            );
        }
    }

    fn requester(&self, connection_id: ConnectionId) -> Result<ConnectionHandle, RelayError> {
        self.inner
            .connections
            .handle(connection_id)
            .ok_or(RelayError::UnknownConnection(connection_id))
    }

    // Registers the cleanup hook; undoes the table insert if the connection
    // vanished in the meantime.
    fn bind(
        &self,
        table: &mut SessionTable,
        connection_id: ConnectionId,
        session_id: &str,
        user_id: &str,
    ) -> Result<(), RelayError> {
        let membership = Membership::new(session_id, user_id);
        if let Err(err) = self
            .inner
            .connections
            .track_membership(connection_id, membership)
        {
            table.remove_member(session_id, user_id, connection_id);
            return Err(err);
        }
        Ok(())
    }
}

fn broadcast_user_count(table: &SessionTable, session_id: &str) -> BroadcastMetrics {
    table
        .get(session_id)
        .map(|session| session.broadcast(&session.user_count()))
        .unwrap_or_default()
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}
