//! Single-agent dispatch and multi-agent fan-out.
//!
//! Every dispatch resolves the agent, checks the task's data categories
//! against the agent's scope, and runs the executor on its own tokio task
//! under the agent's timeout. Failures of any kind come back as a
//! [`TaskResult`]; nothing here returns an error to the caller.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::audit::{self, AuditEntry, AuditEventType, AuditLogger};
use crate::clock::Clock;
use crate::models::task::{CoordinatedResults, Task, TaskResult};
use crate::models::ErrorCode;
use crate::orchestrator::agent::{Agent, AgentStats, ExecutionContext};
use crate::orchestrator::registry::AgentRegistry;

/// One entry of the in-memory dispatch log.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DispatchRecord {
    /// When the dispatch settled.
    pub timestamp: DateTime<Utc>,
    /// User that submitted the task, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    /// Requested agent type.
    pub agent_type: String,
    /// Task digest; the payload itself is never kept.
    pub task_hash: String,
    /// `success` or the failure code.
    pub outcome: String,
}

/// Routes tasks to agents.
pub struct Orchestrator {
    agents: AgentRegistry,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<dyn AuditLogger>>,
    request_log: Mutex<VecDeque<DispatchRecord>>,
    log_capacity: usize,
    cancel_grace: Duration,
}

/// How long a timed-out execution may keep running after its token is
/// cancelled before the task is aborted.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(1);

impl Orchestrator {
    /// Create an orchestrator over a fully built agent registry.
    #[must_use]
    pub fn new(agents: AgentRegistry, clock: Arc<dyn Clock>, log_capacity: usize) -> Self {
        Self {
            agents,
            clock,
            audit: None,
            request_log: Mutex::new(VecDeque::with_capacity(log_capacity.min(1024))),
            log_capacity,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    /// Replace the post-timeout grace given to executors to observe cancellation.
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Record dispatches on `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Registered agents.
    #[must_use]
    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Route `task` to the agent registered as `agent_type`.
    ///
    /// Unknown types yield `agent_not_found`, out-of-scope categories
    /// yield `permission_denied` without touching the agent's counters,
    /// and an execution that outlives the agent's timeout is abandoned
    /// and reported as `timeout`.
    pub async fn dispatch(
        &self,
        agent_type: &str,
        task: Arc<Task>,
        requester: Option<&str>,
    ) -> TaskResult {
        let task_hash = task.content_hash();
        let span = info_span!("dispatch", agent_type, task_hash = %task_hash);

        async {
            let started = Instant::now();
            let result = match self.agents.lookup(agent_type) {
                None => TaskResult::failure(
                    agent_type,
                    None,
                    ErrorCode::AgentNotFound,
                    format!("agent type {agent_type} is not registered"),
                    self.clock.now(),
                ),
                Some(agent) => self.run(agent, &task).await,
            };

            let outcome = result
                .error_code()
                .map_or("success", ErrorCode::as_str)
                .to_owned();
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            if result.is_success() {
                info!(elapsed_ms, outcome = %outcome, "task dispatched");
            } else {
                warn!(elapsed_ms, outcome = %outcome, "task dispatch failed");
            }

            self.log_dispatch(DispatchRecord {
                timestamp: result.timestamp,
                requester: requester.map(str::to_owned),
                agent_type: agent_type.to_owned(),
                task_hash: task_hash.clone(),
                outcome,
            });
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, agent: &Arc<Agent>, task: &Arc<Task>) -> TaskResult {
        let kind = agent.kind();

        if let Some(category) = agent.permissions().first_denied_category(task) {
            return TaskResult::failure(
                kind.as_str(),
                Some(agent.id().to_owned()),
                ErrorCode::PermissionDenied,
                format!("data category {category} is outside the {kind} scope"),
                self.clock.now(),
            );
        }

        agent.record_attempt(self.clock.now());

        let timeout = agent.permissions().timeout();
        let cancel = CancellationToken::new();
        let ctx = ExecutionContext {
            cancel: cancel.clone(),
            agent_id: agent.id().to_owned(),
            max_iterations: agent.permissions().max_iterations(),
        };
        let executor = agent.executor();
        let owned_task = Arc::clone(task);
        let mut handle =
            tokio::spawn(async move { executor.execute(&owned_task, ctx).await });

        let failure = |code: ErrorCode, message: String| {
            TaskResult::failure(
                kind.as_str(),
                Some(agent.id().to_owned()),
                code,
                message,
                self.clock.now(),
            )
        };

        let waited = tokio::time::timeout(timeout, &mut handle).await;
        match waited {
            Ok(Ok(Ok(value))) => {
                TaskResult::success(kind.as_str(), agent.id(), value, self.clock.now())
            }
            Ok(Ok(Err(err))) => failure(ErrorCode::ExecutionFailed, err.to_string()),
            Ok(Err(join_err)) if join_err.is_panic() => {
                failure(ErrorCode::ExecutionFailed, format!("agent {kind} panicked"))
            }
            Ok(Err(_)) => failure(
                ErrorCode::ExecutionFailed,
                format!("agent {kind} execution was aborted"),
            ),
            Err(_) => {
                cancel.cancel();
                let grace = self.cancel_grace;
                // Reap in the background; the caller already has its answer.
                tokio::spawn(async move {
                    if tokio::time::timeout(grace, &mut handle).await.is_err() {
                        handle.abort();
                    }
                });
                failure(
                    ErrorCode::Timeout,
                    format!(
                        "agent {kind} exceeded its {}ms timeout",
                        timeout.as_millis()
                    ),
                )
            }
        }
    }

    /// Fan `task` out to every listed agent type concurrently.
    ///
    /// Duplicate types run once. Each entry settles independently; the
    /// call returns when the slowest dispatch has settled.
    pub async fn coordinate(
        &self,
        task: Arc<Task>,
        agent_types: &[String],
        requester: Option<&str>,
    ) -> CoordinatedResults {
        let mut seen = HashSet::new();
        let unique: Vec<&str> = agent_types
            .iter()
            .map(String::as_str)
            .filter(|agent_type| seen.insert(*agent_type))
            .collect();

        let task_hash = task.content_hash();
        let span = info_span!("coordinate", agents = unique.len(), task_hash = %task_hash);

        async {
            let settled = join_all(unique.iter().map(|agent_type| {
                let task = Arc::clone(&task);
                async move {
                    let result = self.dispatch(agent_type, task, requester).await;
                    ((*agent_type).to_owned(), result)
                }
            }))
            .await;

            let results = CoordinatedResults {
                coordinated_results: settled.into_iter().collect::<BTreeMap<_, _>>(),
                timestamp: self.clock.now(),
            };

            let outcome = format!("{}/{} succeeded", results.success_count(), unique.len());
            info!(outcome = %outcome, "task coordinated");
            let mut entry = AuditEntry::new(AuditEventType::TaskCoordinated)
                .at(results.timestamp)
                .with_agent(unique.join(","))
                .with_task_hash(task_hash.clone())
                .with_outcome(outcome);
            if let Some(user) = requester {
                entry = entry.with_user(user.to_owned());
            }
            audit::record(self.audit.as_deref(), entry);

            results
        }
        .instrument(span)
        .await
    }

    fn log_dispatch(&self, record: DispatchRecord) {
        let mut entry = AuditEntry::new(AuditEventType::TaskDispatched)
            .at(record.timestamp)
            .with_agent(record.agent_type.clone())
            .with_task_hash(record.task_hash.clone())
            .with_outcome(record.outcome.clone());
        if let Some(user) = &record.requester {
            entry = entry.with_user(user.clone());
        }
        audit::record(self.audit.as_deref(), entry);

        if self.log_capacity == 0 {
            return;
        }
        let mut log = self
            .request_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while log.len() >= self.log_capacity {
            log.pop_front();
        }
        log.push_back(record);
    }

    /// Recent dispatch records, oldest first.
    #[must_use]
    pub fn recent_dispatches(&self) -> Vec<DispatchRecord> {
        self.request_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Counters of every registered agent.
    #[must_use]
    pub fn agent_stats(&self) -> Vec<AgentStats> {
        let now = self.clock.now();
        self.agents.iter().map(|agent| agent.stats(now)).collect()
    }
}
