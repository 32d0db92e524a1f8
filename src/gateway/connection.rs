//! One live client connection: identity, activity, and rate limiting.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::clock::{to_time_delta, Clock};
use crate::config::ConnectionConfig;
use crate::gateway::transport::Transport;
use crate::models::message::{InboundMessage, OutboundMessage};
use crate::models::ErrorCode;
use crate::{AppError, Result};

/// Lifecycle of a connection.
///
/// `Closed` is terminal. Rate limiting is a per-message outcome and does
/// not change the state.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created but not yet inserted into the registry.
    Connecting,
    /// Registered and accepting traffic.
    Open,
    /// Eviction started; sends are refused.
    Closing,
    /// Transport closed.
    Closed,
}

#[derive(Debug)]
struct Activity {
    last_activity: DateTime<Utc>,
    last_heartbeat: Option<DateTime<Utc>>,
    window: VecDeque<DateTime<Utc>>,
}

/// A transport channel bound to one user and one logical session.
pub struct Connection {
    id: String,
    user_id: String,
    session_id: String,
    connected_at: DateTime<Utc>,
    message_count: AtomicU64,
    activity: Mutex<Activity>,
    state: Mutex<ConnectionState>,
    closed: CancellationToken,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection in the `Connecting` state with a fresh id.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            connected_at: now,
            message_count: AtomicU64::new(0),
            activity: Mutex::new(Activity {
                last_activity: now,
                last_heartbeat: None,
                window: VecDeque::new(),
            }),
            state: Mutex::new(ConnectionState::Connecting),
            closed: CancellationToken::new(),
            transport,
            clock,
        }
    }

    /// Transport-level identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// User this connection is bound to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Logical session this connection is bound to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Admission time.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Inbound frames received so far, including rejected ones.
    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    /// Time of the last inbound frame (or admission).
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.lock_activity().last_activity
    }

    /// Time of the last successful liveness probe.
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.lock_activity().last_heartbeat
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the connection has been fully closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    fn lock_activity(&self) -> std::sync::MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sliding-window limiter.
    ///
    /// Drops timestamps that are `window` or older, then refuses if
    /// `max_messages` remain. A refused attempt is not recorded.
    pub fn is_rate_limited(&self, max_messages: usize, window: Duration) -> bool {
        let now = self.clock.now();
        let window = to_time_delta(window);
        let mut activity = self.lock_activity();
        activity.window.retain(|t| now - *t < window);
        if activity.window.len() >= max_messages {
            return true;
        }
        activity.window.push_back(now);
        false
    }

    /// Validate one raw inbound frame.
    ///
    /// The rate check runs before parsing, so a flood of garbage still
    /// counts against the window.
    ///
    /// # Errors
    ///
    /// Returns a ready-to-send `error` frame carrying `rate_limit_exceeded`
    /// or `invalid_message`. The connection stays open either way.
    pub fn handle_inbound(
        &self,
        raw: &str,
        config: &ConnectionConfig,
    ) -> std::result::Result<InboundMessage, OutboundMessage> {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.lock_activity().last_activity = self.clock.now();

        if self.is_rate_limited(config.max_messages, config.rate_window()) {
            debug!(connection_id = %self.id, "inbound message rate limited");
            return Err(OutboundMessage::error(
                ErrorCode::RateLimitExceeded,
                format!(
                    "more than {} messages in {}s",
                    config.max_messages, config.rate_window_seconds
                ),
            ));
        }

        InboundMessage::parse(raw, config.max_message_type_len)
            .map_err(|reason| OutboundMessage::error(ErrorCode::InvalidMessage, reason))
    }

    /// Serialize and send `message`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the connection is closing or the
    /// transport refuses the frame.
    pub async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if matches!(
            self.state(),
            ConnectionState::Closing | ConnectionState::Closed
        ) {
            return Err(AppError::Transport(format!(
                "connection {} is closed",
                self.id
            )));
        }
        let frame = serde_json::to_string(message)?;
        self.transport.send(frame).await
    }

    /// Send a liveness probe and record it on success.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the probe cannot be delivered.
    pub async fn probe(&self) -> Result<()> {
        let now = self.clock.now();
        self.send(&OutboundMessage::Heartbeat { timestamp: now })
            .await?;
        self.lock_activity().last_heartbeat = Some(now);
        Ok(())
    }

    pub(crate) fn mark_open(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Open;
        }
    }

    /// Move to `Closing`. Returns `false` if a close already started.
    pub(crate) fn begin_close(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            ConnectionState::Closing | ConnectionState::Closed => false,
            ConnectionState::Connecting | ConnectionState::Open => {
                *state = ConnectionState::Closing;
                true
            }
        }
    }

    /// Close the transport, waiting at most `grace`, then mark `Closed`.
    pub(crate) async fn finish_close(&self, grace: Duration) {
        if tokio::time::timeout(grace, self.transport.close())
            .await
            .is_err()
        {
            debug!(connection_id = %self.id, "transport close timed out");
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ConnectionState::Closed;
        self.closed.cancel();
    }
}
