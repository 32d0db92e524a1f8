//! Consumer of the bounded inbound channel.
//!
//! Socket reader tasks push validated messages here; the router turns
//! each one into an orchestrator call and writes the reply back to the
//! originating connection.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::gateway::connection::Connection;
use crate::gateway::registry::ConnectionRegistry;
use crate::models::agent::AgentKind;
use crate::models::message::{InboundMessage, OutboundMessage};
use crate::models::task::{Task, TaskResult};
use crate::models::ErrorCode;
use crate::orchestrator::Orchestrator;

/// A validated inbound message and the connection it arrived on.
#[derive(Debug)]
pub struct InboundEnvelope {
    /// Originating connection.
    pub connection: Arc<Connection>,
    /// Parsed message.
    pub message: InboundMessage,
}

/// Maps inbound messages to orchestrator calls.
pub struct InboundRouter {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<ConnectionRegistry>,
    clock: Arc<dyn Clock>,
}

impl InboundRouter {
    /// Create a router.
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        registry: Arc<ConnectionRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            clock,
        }
    }

    /// Compute the reply for one message from `user_id`.
    pub async fn route(&self, user_id: &str, message: &InboundMessage) -> OutboundMessage {
        match message.kind.as_str() {
            "ping" => OutboundMessage::Heartbeat {
                timestamp: self.clock.now(),
            },
            "chat" => {
                let message_type = message.message_type.as_deref().unwrap_or("chat");
                let Some(kind) = AgentKind::for_message_type(message_type) else {
                    return OutboundMessage::AgentResponse {
                        result: TaskResult::failure(
                            message_type,
                            None,
                            ErrorCode::AgentNotFound,
                            format!("no agent handles message_type {message_type}"),
                            self.clock.now(),
                        ),
                    };
                };
                let result = self
                    .orchestrator
                    .dispatch(kind.as_str(), task_from(message), Some(user_id))
                    .await;
                OutboundMessage::AgentResponse { result }
            }
            "agent_request" => {
                let Some(agent_type) = message.context_str("agent_type") else {
                    return OutboundMessage::error(
                        ErrorCode::InvalidMessage,
                        "agent_request requires context.agent_type",
                    );
                };
                let result = self
                    .orchestrator
                    .dispatch(agent_type, task_from(message), Some(user_id))
                    .await;
                OutboundMessage::AgentResponse { result }
            }
            "coordinate" => {
                let agent_types = message.context_strings("agent_types");
                if agent_types.is_empty() {
                    return OutboundMessage::error(
                        ErrorCode::InvalidMessage,
                        "coordinate requires a non-empty context.agent_types",
                    );
                }
                let results = self
                    .orchestrator
                    .coordinate(task_from(message), &agent_types, Some(user_id))
                    .await;
                OutboundMessage::CoordinatedResponse { results }
            }
            other => OutboundMessage::error(
                ErrorCode::InvalidMessage,
                format!("unsupported message type {other}"),
            ),
        }
    }

    /// Route `envelope` and write the reply; a failed write evicts the connection.
    pub async fn handle(&self, envelope: InboundEnvelope) {
        let InboundEnvelope {
            connection,
            message,
        } = envelope;
        let reply = self.route(connection.user_id(), &message).await;
        debug!(
            connection_id = %connection.id(),
            inbound = %message.kind,
            reply = reply.kind(),
            "inbound message routed"
        );
        if let Err(err) = connection.send(&reply).await {
            warn!(connection_id = %connection.id(), %err, "reply not delivered");
            self.registry
                .evict_with_reason(connection.id(), ErrorCode::TransportFailure.as_str())
                .await;
        }
    }

    /// Drain `rx` until cancelled, handling each message on its own task.
    ///
    /// Handler tasks are spawned on `tracker` so shutdown can wait for
    /// replies already in flight.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<InboundEnvelope>,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) {
        info!("inbound router started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                envelope = rx.recv() => {
                    let Some(envelope) = envelope else { break };
                    let router = Arc::clone(&self);
                    tracker.spawn(async move { router.handle(envelope).await });
                }
            }
        }
        info!("inbound router stopped");
    }
}

fn task_from(message: &InboundMessage) -> Arc<Task> {
    Arc::new(Task::new(
        message.context_strings("data_categories"),
        json!({
            "content": message.content,
            "context": message.context,
        }),
    ))
}
