//! Periodic liveness probing of every registered connection.
//!
//! Each tick takes a snapshot of the registry, probes all connections
//! concurrently, and evicts those whose probe could not be delivered.
//! Cancellation is observed only between ticks, so evictions started by
//! a tick always run to completion.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::gateway::registry::ConnectionRegistry;
use crate::models::ErrorCode;

/// Builder for the liveness background task.
///
/// Call [`spawn`](Self::spawn) to start probing.
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
}

impl LivenessMonitor {
    /// Construct a monitor (does not start it).
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            interval,
            cancel,
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Probe loop. The first probe runs one interval after start.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "liveness monitor started");
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    sweep(&self.registry).await;
                }
            }
        }
        info!("liveness monitor stopped");
    }
}

/// Probe every registered connection once and evict the unresponsive ones.
///
/// Returns the number of connections evicted by this sweep.
pub async fn sweep(registry: &ConnectionRegistry) -> usize {
    let connections = registry.snapshot();
    let probed = connections.len();

    async {
        let outcomes = join_all(connections.iter().map(|conn| conn.probe())).await;

        let mut evicted = 0;
        for (conn, outcome) in connections.iter().zip(outcomes) {
            if let Err(err) = outcome {
                warn!(connection_id = %conn.id(), %err, "liveness probe failed");
                if registry
                    .evict_with_reason(conn.id(), ErrorCode::TransportFailure.as_str())
                    .await
                {
                    evicted += 1;
                }
            }
        }
        debug!(probed, evicted, "liveness sweep complete");
        evicted
    }
    .instrument(info_span!("liveness_tick", probed))
    .await
}
