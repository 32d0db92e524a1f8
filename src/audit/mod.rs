//! Structured audit trail for connection lifecycle and task dispatch.
//!
//! Provides the [`AuditLogger`] trait and associated types. The primary
//! implementation, [`JsonlAuditWriter`], appends JSONL records to
//! daily-rotating files. Entries carry task hashes, never raw payloads.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type classification for audit log entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A connection was admitted into the registry.
    ConnectionAdmitted,
    /// A connection was removed from the registry.
    ConnectionEvicted,
    /// A prior connection was evicted to make room on its session id.
    SessionTakeover,
    /// A task was dispatched to one agent.
    TaskDispatched,
    /// A task was fanned out to several agents.
    TaskCoordinated,
}

/// A structured record of one gateway or orchestrator event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ISO 8601 timestamp with timezone.
    pub timestamp: DateTime<Utc>,
    /// Event classification.
    pub event_type: AuditEventType,
    /// Transport connection identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// User bound to the connection or task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Logical session identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Target agent type(s), comma-separated for fan-outs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Truncated digest of the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_hash: Option<String>,
    /// Brief outcome description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Why the event happened, when not obvious from the type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEntry {
    /// Construct a minimal audit entry for the given event type.
    #[must_use]
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            connection_id: None,
            user_id: None,
            session_id: None,
            agent_type: None,
            task_hash: None,
            outcome: None,
            reason: None,
        }
    }

    /// Override the entry timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the connection identity triple.
    #[must_use]
    pub fn with_connection(mut self, connection_id: &str, user_id: &str, session_id: &str) -> Self {
        self.connection_id = Some(connection_id.to_owned());
        self.user_id = Some(user_id.to_owned());
        self.session_id = Some(session_id.to_owned());
        self
    }

    /// Set the requesting user.
    #[must_use]
    pub fn with_user(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set the target agent type.
    #[must_use]
    pub fn with_agent(mut self, agent_type: String) -> Self {
        self.agent_type = Some(agent_type);
        self
    }

    /// Set the task digest.
    #[must_use]
    pub fn with_task_hash(mut self, task_hash: String) -> Self {
        self.task_hash = Some(task_hash);
        self
    }

    /// Set the outcome summary.
    #[must_use]
    pub fn with_outcome(mut self, outcome: String) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Set the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: String) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// Writes structured audit entries to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()>;
}

/// Record `entry` on `logger` if auditing is enabled; failures are logged, not raised.
pub fn record(logger: Option<&dyn AuditLogger>, entry: AuditEntry) {
    if let Some(logger) = logger {
        if let Err(err) = logger.log_entry(entry) {
            tracing::warn!(%err, "failed to write audit entry");
        }
    }
}

pub use writer::JsonlAuditWriter;
