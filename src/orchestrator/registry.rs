//! Agent type to agent instance table.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::clock::Clock;
use crate::config::GlobalConfig;
use crate::models::agent::AgentKind;
use crate::models::permission::PermissionDescriptor;
use crate::orchestrator::agent::{AcknowledgeExecutor, Agent, AgentExecutor};

/// Agents keyed by kind.
///
/// Built once before the orchestrator starts and never mutated after, so
/// lookups need no locking.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentKind, Arc<Agent>>,
}

impl AgentRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every enabled kind with its configured limits and the acknowledge executor.
    #[must_use]
    pub fn from_config(config: &GlobalConfig, clock: &dyn Clock) -> Self {
        let mut registry = Self::new();
        for kind in AgentKind::ALL {
            if config.agent_enabled(kind) {
                let executor = Arc::new(AcknowledgeExecutor::new(kind));
                registry.register_kind(config, kind, executor, clock);
            } else {
                info!(agent_type = %kind, "agent disabled by configuration");
            }
        }
        registry
    }

    /// Register `kind` with its built-in descriptor, configured limits, and `executor`.
    pub fn register_kind(
        &mut self,
        config: &GlobalConfig,
        kind: AgentKind,
        executor: Arc<dyn AgentExecutor>,
        clock: &dyn Clock,
    ) {
        let permissions = PermissionDescriptor::for_kind(kind)
            .with_timeout(config.agent_timeout(kind))
            .with_max_iterations(config.agent_max_iterations(kind));
        self.register(Agent::new(kind, permissions, executor, clock.now()));
    }

    /// Insert `agent`, replacing any agent of the same kind.
    pub fn register(&mut self, agent: Agent) {
        self.agents.insert(agent.kind(), Arc::new(agent));
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.register(agent);
        self
    }

    /// Agent registered for `kind`.
    #[must_use]
    pub fn get(&self, kind: AgentKind) -> Option<&Arc<Agent>> {
        self.agents.get(&kind)
    }

    /// Agent for a wire agent-type name; unknown names resolve to `None`.
    #[must_use]
    pub fn lookup(&self, agent_type: &str) -> Option<&Arc<Agent>> {
        agent_type
            .parse::<AgentKind>()
            .ok()
            .and_then(|kind| self.get(kind))
    }

    /// Registered agents in kind order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Agent>> {
        self.agents.values()
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
