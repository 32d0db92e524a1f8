//! Task submissions and their results.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the task digest.
const TASK_HASH_LEN: usize = 16;

/// Closed failure taxonomy reported as data on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Inbound frame could not be parsed or lacks a discriminator.
    InvalidMessage,
    /// Sliding-window limiter tripped for the connection.
    RateLimitExceeded,
    /// No agent is registered under the requested type.
    AgentNotFound,
    /// Task declares a category outside the agent's scope.
    PermissionDenied,
    /// Agent exceeded its execution bound.
    Timeout,
    /// Send or receive on a connection failed.
    TransportFailure,
    /// Agent returned an error or panicked.
    ExecutionFailed,
}

impl ErrorCode {
    /// Wire name of this code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMessage => "invalid_message",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::AgentNotFound => "agent_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::Timeout => "timeout",
            Self::TransportFailure => "transport_failure",
            Self::ExecutionFailed => "execution_failed",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable unit of work submitted to one or more agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(default, alias = "dataCategories")]
    data_categories: Vec<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Task {
    /// Build a task from its declared categories and opaque payload.
    #[must_use]
    pub fn new<I, S>(data_categories: I, payload: serde_json::Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            data_categories: data_categories.into_iter().map(Into::into).collect(),
            payload,
        }
    }

    /// Data categories the task touches.
    #[must_use]
    pub fn data_categories(&self) -> &[String] {
        &self.data_categories
    }

    /// Opaque payload handed to the executing agent.
    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Short SHA-256 digest of the task's canonical JSON form.
    ///
    /// Object keys are serialized in sorted order, so equal tasks hash
    /// equally regardless of how they were built.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::json!({
            "data_categories": self.data_categories,
            "payload": self.payload,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        let mut digest = format!("{:x}", hasher.finalize());
        digest.truncate(TASK_HASH_LEN);
        digest
    }
}

/// Outcome half of a [`TaskResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Agent completed and produced a payload.
    Success {
        /// Agent output, passed through unchanged.
        result: serde_json::Value,
    },
    /// Task did not produce a trusted result.
    Failure {
        /// Failure classification.
        error: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

/// Result of one task against one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    /// Agent type the task was routed to.
    pub agent_type: String,
    /// Instance identifier of the producing agent, when one was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// When the result was produced.
    pub timestamp: DateTime<Utc>,
    /// Success payload or typed failure.
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

impl TaskResult {
    /// Successful result.
    #[must_use]
    pub fn success(
        agent_type: impl Into<String>,
        agent_id: impl Into<String>,
        result: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_type: agent_type.into(),
            agent_id: Some(agent_id.into()),
            timestamp,
            outcome: TaskOutcome::Success { result },
        }
    }

    /// Failed result.
    #[must_use]
    pub fn failure(
        agent_type: impl Into<String>,
        agent_id: Option<String>,
        error: ErrorCode,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_type: agent_type.into(),
            agent_id,
            timestamp,
            outcome: TaskOutcome::Failure {
                error,
                message: message.into(),
            },
        }
    }

    /// Whether the agent produced a payload.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Success { .. })
    }

    /// Failure code, if any.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.outcome {
            TaskOutcome::Success { .. } => None,
            TaskOutcome::Failure { error, .. } => Some(error),
        }
    }

    /// Success payload, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            TaskOutcome::Success { result } => Some(result),
            TaskOutcome::Failure { .. } => None,
        }
    }
}

/// Aggregate of a fan-out across several agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatedResults {
    /// Per-agent results keyed by requested agent type.
    pub coordinated_results: BTreeMap<String, TaskResult>,
    /// When the last dispatch settled.
    pub timestamp: DateTime<Utc>,
}

impl CoordinatedResults {
    /// Result for `agent_type`, if it was requested.
    #[must_use]
    pub fn get(&self, agent_type: &str) -> Option<&TaskResult> {
        self.coordinated_results.get(agent_type)
    }

    /// Number of agents that succeeded.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.coordinated_results
            .values()
            .filter(|r| r.is_success())
            .count()
    }
}
