//! Explicit process context.
//!
//! [`GatewayContext`] owns every shared component: the connection
//! registry, the orchestrator, the inbound channel, and the background
//! tasks. It is built once at startup and handed to whatever needs it.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, Instrument};

use crate::audit::{AuditLogger, JsonlAuditWriter};
use crate::clock::{Clock, SystemClock};
use crate::config::GlobalConfig;
use crate::gateway::liveness::LivenessMonitor;
use crate::gateway::registry::ConnectionRegistry;
use crate::gateway::router::{InboundEnvelope, InboundRouter};
use crate::gateway::server::{self, GatewayState};
use crate::orchestrator::{AgentRegistry, Orchestrator};
use crate::Result;

/// Running gateway: shared components plus background tasks.
pub struct GatewayContext {
    config: GlobalConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<ConnectionRegistry>,
    orchestrator: Arc<Orchestrator>,
    inbound_tx: mpsc::Sender<InboundEnvelope>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl GatewayContext {
    /// Build every component and spawn the liveness monitor and inbound router.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        config: GlobalConfig,
        clock: Arc<dyn Clock>,
        agents: AgentRegistry,
        audit: Option<Arc<dyn AuditLogger>>,
    ) -> Self {
        let mut registry =
            ConnectionRegistry::new(Arc::clone(&clock), config.connection.close_grace());
        let mut orchestrator = Orchestrator::new(
            agents,
            Arc::clone(&clock),
            config.orchestrator.request_log_capacity,
        )
        .with_cancel_grace(config.orchestrator.cancel_grace());
        if let Some(audit) = audit {
            registry = registry.with_audit(Arc::clone(&audit));
            orchestrator = orchestrator.with_audit(audit);
        }
        let registry = Arc::new(registry);
        let orchestrator = Arc::new(orchestrator);

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.connection.inbound_queue_size);

        let monitor = LivenessMonitor::new(
            Arc::clone(&registry),
            config.connection.heartbeat_interval(),
            cancel.clone(),
        );
        tracker.spawn(monitor.run());

        let router = Arc::new(InboundRouter::new(
            Arc::clone(&orchestrator),
            Arc::clone(&registry),
            Arc::clone(&clock),
        ));
        tracker.spawn(router.run(inbound_rx, cancel.clone(), tracker.clone()));

        info!(
            agents = orchestrator.agents().len(),
            heartbeat_secs = config.connection.heartbeat_interval_seconds,
            "gateway context started"
        );

        Self {
            config,
            clock,
            registry,
            orchestrator,
            inbound_tx,
            cancel,
            tracker,
        }
    }

    /// Production wiring: system clock, configured agents, optional JSONL audit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Audit` if the audit directory cannot be created.
    pub fn from_config(config: GlobalConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let agents = AgentRegistry::from_config(&config, clock.as_ref());
        let audit = match &config.audit.log_dir {
            Some(dir) => {
                let writer: Arc<dyn AuditLogger> = Arc::new(JsonlAuditWriter::new(dir.clone())?);
                Some(writer)
            }
            None => None,
        };
        Ok(Self::start(config, clock, agents, audit))
    }

    /// Handler state for the HTTP/WebSocket server.
    #[must_use]
    pub fn state(&self) -> GatewayState {
        GatewayState {
            registry: Arc::clone(&self.registry),
            orchestrator: Arc::clone(&self.orchestrator),
            inbound_tx: self.inbound_tx.clone(),
            connection: self.config.connection.clone(),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Serve HTTP and WebSocket traffic on `listener` until shutdown starts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the server fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        server::serve(listener, self.state(), self.cancel.clone()).await
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Token cancelled when shutdown starts.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop background tasks, wait for in-flight replies, then evict everyone.
    pub async fn shutdown(&self) {
        async {
            self.cancel.cancel();
            self.tracker.close();
            self.tracker.wait().await;
            let evicted = self.registry.evict_all().await;
            info!(evicted, "gateway context shut down");
        }
        .instrument(info_span!("gateway_shutdown"))
        .await;
    }
}
