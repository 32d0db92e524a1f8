//! Process-wide table of live connections.
//!
//! Three indices (by connection id, by user id, by session id) live behind
//! one mutex and are only ever mutated together. Transport I/O always
//! happens after the lock is released: callers detach or snapshot under
//! the lock, then act on the owned `Arc<Connection>` values.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::audit::{self, AuditEntry, AuditEventType, AuditLogger};
use crate::clock::Clock;
use crate::gateway::connection::Connection;
use crate::gateway::transport::Transport;
use crate::models::message::OutboundMessage;
use crate::models::ErrorCode;
use crate::{AppError, Result};

/// Read-only snapshot of registry occupancy.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Live connections.
    pub total_connections: usize,
    /// Distinct users with at least one live connection.
    pub unique_users: usize,
    /// Live connection count per user.
    pub connections_by_user: BTreeMap<String, usize>,
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<String, Arc<Connection>>,
    by_user: HashMap<String, HashSet<String>>,
    by_session: HashMap<String, String>,
}

impl Indices {
    fn insert(&mut self, conn: Arc<Connection>) {
        let id = conn.id().to_owned();
        self.by_user
            .entry(conn.user_id().to_owned())
            .or_default()
            .insert(id.clone());
        self.by_session
            .insert(conn.session_id().to_owned(), id.clone());
        self.by_id.insert(id, conn);
    }

    fn detach(&mut self, connection_id: &str) -> Option<Arc<Connection>> {
        let conn = self.by_id.remove(connection_id)?;
        if let Some(bucket) = self.by_user.get_mut(conn.user_id()) {
            bucket.remove(connection_id);
            if bucket.is_empty() {
                self.by_user.remove(conn.user_id());
            }
        }
        if self
            .by_session
            .get(conn.session_id())
            .is_some_and(|id| id == connection_id)
        {
            // Hand the slot to the newest survivor bound to the same session.
            let successor = self
                .by_id
                .values()
                .filter(|other| other.session_id() == conn.session_id())
                .max_by_key(|other| other.connected_at())
                .map(|other| other.id().to_owned());
            match successor {
                Some(id) => {
                    self.by_session.insert(conn.session_id().to_owned(), id);
                }
                None => {
                    self.by_session.remove(conn.session_id());
                }
            }
        }
        Some(conn)
    }

    fn is_consistent(&self) -> bool {
        let bucketed: usize = self.by_user.values().map(HashSet::len).sum();
        let users_ok = self.by_user.iter().all(|(user, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    self.by_id
                        .get(id)
                        .is_some_and(|conn| conn.user_id() == user)
                })
        });
        let sessions_ok = self.by_session.iter().all(|(session, id)| {
            self.by_id
                .get(id)
                .is_some_and(|conn| conn.session_id() == session)
        });
        bucketed == self.by_id.len() && users_ok && sessions_ok
    }
}

/// Registry of live connections with single-session enforcement.
pub struct ConnectionRegistry {
    indices: Mutex<Indices>,
    clock: Arc<dyn Clock>,
    close_grace: Duration,
    audit: Option<Arc<dyn AuditLogger>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    ///
    /// `close_grace` bounds how long an eviction waits for one transport
    /// to close.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, close_grace: Duration) -> Self {
        Self {
            indices: Mutex::new(Indices::default()),
            clock,
            close_grace,
            audit: None,
        }
    }

    /// Record admissions and evictions on `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Indices> {
        self.indices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn audit(&self, entry: AuditEntry) {
        audit::record(self.audit.as_deref(), entry.at(self.clock.now()));
    }

    /// Admit a new connection for `user_id` on `session_id`.
    ///
    /// With `single_session`, any connection occupying the session slot is
    /// detached and fully closed before the new one is inserted. Without
    /// it, the new connection takes over the slot and the prior one stays
    /// reachable by id and user; it regains the slot if the new one leaves
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the `connection_established`
    /// frame cannot be delivered; the new connection is evicted first.
    pub async fn admit(
        &self,
        transport: Arc<dyn Transport>,
        user_id: &str,
        session_id: &str,
        single_session: bool,
    ) -> Result<Arc<Connection>> {
        let conn = Arc::new(Connection::new(
            transport,
            user_id,
            session_id,
            Arc::clone(&self.clock),
        ));
        let span = info_span!(
            "admit",
            connection_id = %conn.id(),
            user_id,
            session_id,
            single_session
        );

        async {
            loop {
                let displaced = {
                    let mut indices = self.lock();
                    let occupant = indices.by_session.get(session_id).cloned();
                    match occupant {
                        Some(prior_id) if single_session => indices.detach(&prior_id),
                        _ => {
                            indices.insert(Arc::clone(&conn));
                            debug_assert!(indices.is_consistent(), "registry indices out of sync");
                            None
                        }
                    }
                };

                let Some(prior) = displaced else { break };
                info!(prior_connection_id = %prior.id(), "session takeover");
                self.audit(
                    AuditEntry::new(AuditEventType::SessionTakeover)
                        .with_connection(prior.id(), prior.user_id(), prior.session_id())
                        .with_reason(format!("replaced by {}", conn.id())),
                );
                self.close_detached(&prior, "session_takeover").await;
            }

            conn.mark_open();
            self.audit(
                AuditEntry::new(AuditEventType::ConnectionAdmitted).with_connection(
                    conn.id(),
                    user_id,
                    session_id,
                ),
            );

            let established = OutboundMessage::ConnectionEstablished {
                connection_id: conn.id().to_owned(),
                session_id: session_id.to_owned(),
                timestamp: conn.connected_at(),
            };
            if let Err(err) = conn.send(&established).await {
                warn!(%err, "connection_established not delivered");
                self.evict_with_reason(conn.id(), ErrorCode::TransportFailure.as_str())
                    .await;
                return Err(AppError::Transport(format!(
                    "failed to establish connection: {err}"
                )));
            }

            info!("connection admitted");
            Ok(Arc::clone(&conn))
        }
        .instrument(span)
        .await
    }

    /// Remove `connection_id` from every index and close its transport.
    ///
    /// Idempotent: returns `false` if the id was already gone, including
    /// when a concurrent caller won the race.
    pub async fn evict(&self, connection_id: &str) -> bool {
        self.evict_with_reason(connection_id, "evicted").await
    }

    /// [`evict`](Self::evict), recording `reason` in the log span and audit entry.
    pub async fn evict_with_reason(&self, connection_id: &str, reason: &str) -> bool {
        let detached = {
            let mut indices = self.lock();
            let conn = indices.detach(connection_id);
            debug_assert!(indices.is_consistent(), "registry indices out of sync");
            conn
        };
        match detached {
            Some(conn) => {
                self.close_detached(&conn, reason).await;
                true
            }
            None => false,
        }
    }

    async fn close_detached(&self, conn: &Connection, reason: &str) {
        if !conn.begin_close() {
            return;
        }
        let span = info_span!(
            "evict",
            connection_id = %conn.id(),
            user_id = %conn.user_id(),
            session_id = %conn.session_id(),
            reason
        );
        async {
            conn.finish_close(self.close_grace).await;
            self.audit(
                AuditEntry::new(AuditEventType::ConnectionEvicted)
                    .with_connection(conn.id(), conn.user_id(), conn.session_id())
                    .with_reason(reason.to_owned()),
            );
            info!("connection evicted");
        }
        .instrument(span)
        .await;
    }

    /// Deliver `message` to every connection of `user_id`.
    ///
    /// Connections whose send fails are evicted; the rest still receive
    /// the message. Returns the number of successful deliveries.
    pub async fn unicast(&self, user_id: &str, message: &OutboundMessage) -> usize {
        let targets: Vec<Arc<Connection>> = {
            let indices = self.lock();
            indices
                .by_user
                .get(user_id)
                .map(|ids| ids.iter().filter_map(|id| indices.by_id.get(id).cloned()).collect())
                .unwrap_or_default()
        };

        let outcomes = join_all(targets.iter().map(|conn| conn.send(message))).await;

        let mut delivered = 0;
        for (conn, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(connection_id = %conn.id(), user_id, %err, "unicast delivery failed");
                    self.evict_with_reason(conn.id(), ErrorCode::TransportFailure.as_str())
                        .await;
                }
            }
        }
        debug!(user_id, delivered, kind = message.kind(), "unicast complete");
        delivered
    }

    /// Deliver `message` to the connection occupying `session_id`.
    ///
    /// Returns `false` if no connection holds the session or the send
    /// failed (the failing connection is evicted).
    pub async fn send_to_session(&self, session_id: &str, message: &OutboundMessage) -> bool {
        let target = {
            let indices = self.lock();
            indices
                .by_session
                .get(session_id)
                .and_then(|id| indices.by_id.get(id).cloned())
        };
        let Some(conn) = target else {
            return false;
        };
        match conn.send(message).await {
            Ok(()) => true,
            Err(err) => {
                warn!(connection_id = %conn.id(), session_id, %err, "session delivery failed");
                self.evict_with_reason(conn.id(), ErrorCode::TransportFailure.as_str())
                    .await;
                false
            }
        }
    }

    /// Resolve a live connection by id.
    #[must_use]
    pub fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.lock().by_id.get(connection_id).cloned()
    }

    /// Connection currently occupying `session_id`.
    #[must_use]
    pub fn session_occupant(&self, session_id: &str) -> Option<Arc<Connection>> {
        let indices = self.lock();
        indices
            .by_session
            .get(session_id)
            .and_then(|id| indices.by_id.get(id).cloned())
    }

    /// Owned copy of every live connection.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().by_id.values().cloned().collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupancy snapshot for monitoring.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        let indices = self.lock();
        ConnectionStats {
            total_connections: indices.by_id.len(),
            unique_users: indices.by_user.len(),
            connections_by_user: indices
                .by_user
                .iter()
                .map(|(user, ids)| (user.clone(), ids.len()))
                .collect(),
        }
    }

    /// Whether the three indices agree with each other.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.lock().is_consistent()
    }

    /// Evict every connection. Returns how many were evicted by this call.
    pub async fn evict_all(&self) -> usize {
        let ids: Vec<String> = self.lock().by_id.keys().cloned().collect();
        let evictions = ids.iter().map(|id| self.evict_with_reason(id, "shutdown"));
        let evicted = join_all(evictions)
            .await
            .into_iter()
            .filter(|evicted| *evicted)
            .count();
        if evicted > 0 {
            info!(evicted, "all connections evicted");
        }
        evicted
    }
}
