//! Domain and wire models shared by the gateway and the orchestrator.

pub mod agent;
pub mod message;
pub mod permission;
pub mod task;

pub use task::ErrorCode;
