#![forbid(unsafe_code)]

//! `qbit-gateway`: real-time session gateway and permissioned multi-agent
//! task orchestrator.

pub mod audit;
pub mod clock;
pub mod config;
pub mod context;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod orchestrator;

pub use config::GlobalConfig;
pub use context::GatewayContext;
pub use errors::{AppError, Result};
