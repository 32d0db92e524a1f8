//! Capability-scoped execution units.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::models::agent::AgentKind;
use crate::models::permission::PermissionDescriptor;
use crate::models::task::Task;
use crate::Result;

/// Per-execution parameters handed to an [`AgentExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Cancelled when the orchestrator stops waiting for this execution.
    pub cancel: CancellationToken,
    /// Instance id of the executing agent.
    pub agent_id: String,
    /// Iteration budget from the agent's descriptor.
    pub max_iterations: u32,
}

/// Task body of an agent.
///
/// Implementations should observe [`ExecutionContext::cancel`] at their
/// await points; a cancelled execution is abandoned and its output dropped.
pub trait AgentExecutor: Send + Sync {
    /// Run `task` and produce the success payload.
    ///
    /// # Errors
    ///
    /// Any error is reported as an `execution_failed` result.
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        ctx: ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;
}

/// Default executor: acknowledges the task without doing any work.
#[derive(Debug, Clone, Copy)]
pub struct AcknowledgeExecutor {
    kind: AgentKind,
}

impl AcknowledgeExecutor {
    /// Executor acknowledging on behalf of `kind`.
    #[must_use]
    pub fn new(kind: AgentKind) -> Self {
        Self { kind }
    }
}

impl AgentExecutor for AcknowledgeExecutor {
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        ctx: ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            Ok(json!({
                "status": "completed",
                "agent_type": self.kind,
                "agent_id": ctx.agent_id,
                "data_categories": task.data_categories(),
                "task_hash": task.content_hash(),
            }))
        })
    }
}

/// Observability snapshot of one agent.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentStats {
    /// Instance id.
    pub agent_id: String,
    /// Agent type.
    pub agent_type: AgentKind,
    /// Dispatches that passed the permission check.
    pub request_count: u64,
    /// Last dispatch attempt, or creation time if none.
    pub last_activity: DateTime<Utc>,
    /// Seconds since creation.
    pub uptime_seconds: u64,
}

/// A registered agent: kind, permissions, executor, and counters.
pub struct Agent {
    id: String,
    kind: AgentKind,
    permissions: PermissionDescriptor,
    executor: Arc<dyn AgentExecutor>,
    created_at: DateTime<Utc>,
    request_count: AtomicU64,
    last_activity_ms: AtomicI64,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create an agent with a fresh instance id.
    #[must_use]
    pub fn new(
        kind: AgentKind,
        permissions: PermissionDescriptor,
        executor: Arc<dyn AgentExecutor>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            permissions,
            executor,
            created_at,
            request_count: AtomicU64::new(0),
            last_activity_ms: AtomicI64::new(created_at.timestamp_millis()),
        }
    }

    /// Agent with the built-in descriptor for `kind` and the acknowledge executor.
    #[must_use]
    pub fn with_defaults(kind: AgentKind, created_at: DateTime<Utc>) -> Self {
        Self::new(
            kind,
            PermissionDescriptor::for_kind(kind),
            Arc::new(AcknowledgeExecutor::new(kind)),
            created_at,
        )
    }

    /// Instance id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Agent type.
    #[must_use]
    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// Permission descriptor.
    #[must_use]
    pub fn permissions(&self) -> &PermissionDescriptor {
        &self.permissions
    }

    /// Shared handle to the executor.
    #[must_use]
    pub fn executor(&self) -> Arc<dyn AgentExecutor> {
        Arc::clone(&self.executor)
    }

    /// Dispatches that passed the permission check.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub(crate) fn record_attempt(&self, now: DateTime<Utc>) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.last_activity_ms
            .fetch_max(now.timestamp_millis(), Ordering::Relaxed);
    }

    /// Counters snapshot at `now`.
    #[must_use]
    pub fn stats(&self, now: DateTime<Utc>) -> AgentStats {
        let last_activity = DateTime::from_timestamp_millis(
            self.last_activity_ms.load(Ordering::Relaxed),
        )
        .unwrap_or(self.created_at);
        AgentStats {
            agent_id: self.id.clone(),
            agent_type: self.kind,
            request_count: self.request_count(),
            last_activity,
            uptime_seconds: u64::try_from((now - self.created_at).num_seconds()).unwrap_or(0),
        }
    }
}
