//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::agent::AgentKind;
use crate::{AppError, Result};

/// HTTP / WebSocket listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port for the HTTP and WebSocket routes; 0 picks a free port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

/// Per-connection limits and liveness settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionConfig {
    /// Messages allowed inside one sliding rate-limit window.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Length of the sliding rate-limit window.
    #[serde(default = "default_rate_window_seconds")]
    pub rate_window_seconds: u64,
    /// Period between liveness probes.
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    /// Default admission mode when the client does not specify one.
    #[serde(default = "default_true")]
    pub single_session: bool,
    /// Capacity of the shared inbound message channel.
    #[serde(default = "default_inbound_queue_size")]
    pub inbound_queue_size: usize,
    /// Capacity of each connection's outbound frame queue.
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,
    /// Upper bound on closing one transport during eviction.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    /// Inbound `type` discriminators are truncated to this many characters.
    #[serde(default = "default_max_message_type_len")]
    pub max_message_type_len: usize,
}

fn default_max_messages() -> usize {
    30
}

fn default_rate_window_seconds() -> u64 {
    60
}

fn default_heartbeat_interval_seconds() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_inbound_queue_size() -> usize {
    100
}

fn default_outbound_queue_size() -> usize {
    64
}

fn default_close_grace_ms() -> u64 {
    5000
}

fn default_max_message_type_len() -> usize {
    50
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            rate_window_seconds: default_rate_window_seconds(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            single_session: true,
            inbound_queue_size: default_inbound_queue_size(),
            outbound_queue_size: default_outbound_queue_size(),
            close_grace_ms: default_close_grace_ms(),
            max_message_type_len: default_max_message_type_len(),
        }
    }
}

impl ConnectionConfig {
    /// Sliding rate-limit window as a [`Duration`].
    #[must_use]
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_seconds)
    }

    /// Liveness probe period as a [`Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// Transport close bound as a [`Duration`].
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Orchestrator-wide defaults.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Execution bound applied to agents without an override.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Iteration budget handed to agents without an override.
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,
    /// Number of recent dispatch records kept in memory.
    #[serde(default = "default_request_log_capacity")]
    pub request_log_capacity: usize,
    /// Time a timed-out execution gets to observe cancellation before it is aborted.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_iterations() -> u32 {
    10
}

fn default_request_log_capacity() -> usize {
    1000
}

fn default_cancel_grace_ms() -> u64 {
    1000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_max_iterations: default_max_iterations(),
            request_log_capacity: default_request_log_capacity(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl OrchestratorConfig {
    /// Post-timeout cancellation grace as a [`Duration`].
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

/// Per-agent overrides keyed by agent type name under `[agents.<name>]`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentOverride {
    /// Execution bound for this agent.
    pub timeout_ms: Option<u64>,
    /// Iteration budget for this agent.
    pub max_iterations: Option<u32>,
    /// Whether the agent is registered at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Audit trail settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AuditConfig {
    /// Directory for daily JSONL audit files; auditing is off when absent.
    pub log_dir: Option<PathBuf>,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Connection limits and liveness.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Orchestrator defaults.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Per-agent overrides.
    #[serde(default)]
    pub agents: HashMap<String, AgentOverride>,
    /// Audit trail settings.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `QBIT_GATEWAY_HOST` / `QBIT_GATEWAY_PORT` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `QBIT_GATEWAY_PORT` is not a valid port.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = env::var("QBIT_GATEWAY_HOST") {
            if host.is_empty() {
                warn!("QBIT_GATEWAY_HOST is empty, keeping configured host");
            } else {
                self.server.host = host;
            }
        }
        if let Ok(port) = env::var("QBIT_GATEWAY_PORT") {
            self.server.http_port = port
                .parse()
                .map_err(|err| AppError::Config(format!("invalid QBIT_GATEWAY_PORT: {err}")))?;
        }
        Ok(())
    }

    /// Socket address the HTTP listener binds to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.http_port)
            .parse()
            .map_err(|err| AppError::Config(format!("invalid bind address: {err}")))
    }

    /// Effective timeout for `kind`, honoring `[agents.<kind>]` overrides.
    #[must_use]
    pub fn agent_timeout(&self, kind: AgentKind) -> Duration {
        let ms = self
            .agents
            .get(kind.as_str())
            .and_then(|o| o.timeout_ms)
            .unwrap_or(self.orchestrator.default_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Effective iteration budget for `kind`.
    #[must_use]
    pub fn agent_max_iterations(&self, kind: AgentKind) -> u32 {
        self.agents
            .get(kind.as_str())
            .and_then(|o| o.max_iterations)
            .unwrap_or(self.orchestrator.default_max_iterations)
    }

    /// Whether `kind` should be registered at startup.
    #[must_use]
    pub fn agent_enabled(&self, kind: AgentKind) -> bool {
        self.agents.get(kind.as_str()).is_none_or(|o| o.enabled)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;
        let positive = [
            ("connection.max_messages", conn.max_messages > 0),
            ("connection.rate_window_seconds", conn.rate_window_seconds > 0),
            (
                "connection.heartbeat_interval_seconds",
                conn.heartbeat_interval_seconds > 0,
            ),
            ("connection.inbound_queue_size", conn.inbound_queue_size > 0),
            ("connection.outbound_queue_size", conn.outbound_queue_size > 0),
            ("connection.close_grace_ms", conn.close_grace_ms > 0),
            ("connection.max_message_type_len", conn.max_message_type_len > 0),
            (
                "orchestrator.default_timeout_ms",
                self.orchestrator.default_timeout_ms > 0,
            ),
            (
                "orchestrator.default_max_iterations",
                self.orchestrator.default_max_iterations > 0,
            ),
            (
                "orchestrator.request_log_capacity",
                self.orchestrator.request_log_capacity > 0,
            ),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, ok)| !ok) {
            return Err(AppError::Config(format!("{name} must be greater than zero")));
        }

        for (name, over) in &self.agents {
            if name.parse::<AgentKind>().is_err() {
                return Err(AppError::Config(format!("unknown agent type in [agents]: {name}")));
            }
            if over.timeout_ms == Some(0) {
                return Err(AppError::Config(format!(
                    "agents.{name}.timeout_ms must be greater than zero"
                )));
            }
            if over.max_iterations == Some(0) {
                return Err(AppError::Config(format!(
                    "agents.{name}.max_iterations must be greater than zero"
                )));
            }
        }

        Ok(())
    }
}
