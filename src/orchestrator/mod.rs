//! Permissioned multi-agent task orchestration.

pub mod agent;
pub mod dispatcher;
pub mod registry;

pub use agent::{AcknowledgeExecutor, Agent, AgentExecutor, AgentStats, ExecutionContext};
pub use dispatcher::{DispatchRecord, Orchestrator};
pub use registry::AgentRegistry;
