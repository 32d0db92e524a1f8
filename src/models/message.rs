//! Wire messages exchanged over a client connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::task::{CoordinatedResults, ErrorCode, TaskResult};

/// Parsed inbound client message.
///
/// `kind` is the required `type` discriminator; everything else is optional
/// at the wire level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    /// Message discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form text body.
    #[serde(default)]
    pub content: String,
    /// Routing hint for `chat` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    /// Structured request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

impl InboundMessage {
    /// Parse a raw text frame.
    ///
    /// The frame must be a JSON object carrying a string `type` field. The
    /// discriminator is truncated to `max_type_len` characters.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the frame is malformed.
    pub fn parse(raw: &str, max_type_len: usize) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|err| format!("payload is not JSON: {err}"))?;
        let Some(object) = value.as_object() else {
            return Err("payload must be a JSON object".into());
        };
        match object.get("type") {
            Some(serde_json::Value::String(_)) => {}
            Some(_) => return Err("field `type` must be a string".into()),
            None => return Err("missing field `type`".into()),
        }
        let mut message: Self = serde_json::from_value(value)
            .map_err(|err| format!("invalid message shape: {err}"))?;
        if let Some((idx, _)) = message.kind.char_indices().nth(max_type_len) {
            message.kind.truncate(idx);
        }
        Ok(message)
    }

    /// String field from `context`, if present.
    #[must_use]
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.as_ref()?.get(key)?.as_str()
    }

    /// String-array field from `context`; non-string entries are skipped.
    #[must_use]
    pub fn context_strings(&self, key: &str) -> Vec<String> {
        self.context
            .as_ref()
            .and_then(|ctx| ctx.get(key))
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Frames the gateway writes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// First frame after admission.
    ConnectionEstablished {
        /// Transport-level connection identifier.
        connection_id: String,
        /// Logical session the connection is bound to.
        session_id: String,
        /// Admission time.
        timestamp: DateTime<Utc>,
    },
    /// Liveness probe or `ping` reply.
    Heartbeat {
        /// Probe time.
        timestamp: DateTime<Utc>,
    },
    /// Server-initiated notification for a user.
    Notification {
        /// Short headline.
        title: String,
        /// Notification body.
        content: serde_json::Value,
        /// Creation time.
        timestamp: DateTime<Utc>,
    },
    /// Per-message failure; the connection stays open.
    Error {
        /// Failure classification.
        error: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
    /// Result of a single-agent dispatch.
    AgentResponse {
        /// Dispatch result passed through unchanged.
        #[serde(flatten)]
        result: TaskResult,
    },
    /// Result of a multi-agent fan-out.
    CoordinatedResponse {
        /// Aggregated per-agent results.
        #[serde(flatten)]
        results: CoordinatedResults,
    },
}

impl OutboundMessage {
    /// Error frame for `code`.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            error: code,
            message: message.into(),
        }
    }

    /// Discriminator of this frame, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Notification { .. } => "notification",
            Self::Error { .. } => "error",
            Self::AgentResponse { .. } => "agent_response",
            Self::CoordinatedResponse { .. } => "coordinated_response",
        }
    }
}
