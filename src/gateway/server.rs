//! HTTP and WebSocket surface.
//!
//! `GET /ws` upgrades to a WebSocket bound to a user and session. Each
//! socket gets a writer task draining its [`ChannelTransport`] queue and a
//! reader loop that validates frames and pushes them onto the shared
//! bounded inbound channel. The remaining routes expose stats and the
//! orchestrator over plain JSON.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ConnectionConfig;
use crate::gateway::registry::ConnectionRegistry;
use crate::gateway::router::InboundEnvelope;
use crate::gateway::transport::{ChannelTransport, OutboundFrame};
use crate::models::message::OutboundMessage;
use crate::models::task::Task;
use crate::models::ErrorCode;
use crate::orchestrator::Orchestrator;
use crate::{AppError, Result};

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct GatewayState {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Task router.
    pub orchestrator: Arc<Orchestrator>,
    /// Producer side of the bounded inbound channel.
    pub inbound_tx: mpsc::Sender<InboundEnvelope>,
    /// Per-connection limits.
    pub connection: ConnectionConfig,
    /// Wall clock for server-generated timestamps.
    pub clock: Arc<dyn Clock>,
}

/// Build the axum router with all routes.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/agents", get(agents))
        .route("/agents/dispatches", get(dispatches))
        .route("/agents/dispatch", post(dispatch))
        .route("/agents/coordinate", post(coordinate))
        .route("/notifications/{user_id}", post(notify))
        .with_state(state)
}

/// Serve the gateway on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails while accepting connections.
pub async fn serve(
    listener: TcpListener,
    state: GatewayState,
    ct: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "gateway listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("gateway server error: {err}")))
}

// ── WebSocket ───────────────────────────────────────────

/// Admission parameters of `GET /ws`.
#[derive(Debug, Deserialize)]
struct WsParams {
    user_id: Option<String>,
    session_id: Option<String>,
    single_session: Option<bool>,
}

async fn ws_handler(
    State(state): State<GatewayState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let (Some(user_id), Some(session_id)) = (
        params.user_id.filter(|s| !s.is_empty()),
        params.session_id.filter(|s| !s.is_empty()),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            "user_id and session_id are required",
        )
            .into_response();
    };
    let single_session = params
        .single_session
        .unwrap_or(state.connection.single_session);

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, session_id, single_session))
}

async fn handle_socket(
    socket: WebSocket,
    state: GatewayState,
    user_id: String,
    session_id: String,
    single_session: bool,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (transport, mut frames) = ChannelTransport::new(state.connection.outbound_queue_size);

    // Writer: drain the outbound queue until it closes or a Close frame arrives.
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let conn = match state
        .registry
        .admit(Arc::new(transport), &user_id, &session_id, single_session)
        .await
    {
        Ok(conn) => conn,
        Err(err) => {
            warn!(%err, user_id = %user_id, session_id = %session_id, "admission failed");
            writer.abort();
            return;
        }
    };

    loop {
        let frame = tokio::select! {
            () = conn.closed() => break,
            frame = ws_rx.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                match conn.handle_inbound(text.as_str(), &state.connection) {
                    Ok(message) => {
                        let envelope = InboundEnvelope {
                            connection: Arc::clone(&conn),
                            message,
                        };
                        if state.inbound_tx.send(envelope).await.is_err() {
                            debug!(connection_id = %conn.id(), "inbound channel closed");
                            break;
                        }
                    }
                    Err(reply) => {
                        if conn.send(&reply).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Some(Ok(Message::Binary(_))) => {
                let reply = OutboundMessage::error(
                    ErrorCode::InvalidMessage,
                    "binary frames are not supported",
                );
                if conn.send(&reply).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                debug!(connection_id = %conn.id(), %err, "websocket receive failed");
                break;
            }
        }
    }

    let connection_id = conn.id().to_owned();
    state
        .registry
        .evict_with_reason(&connection_id, "client_disconnected")
        .await;
    drop(conn);
    if tokio::time::timeout(state.connection.close_grace(), writer)
        .await
        .is_err()
    {
        debug!(connection_id = %connection_id, "socket writer did not finish in time");
    }
}

// ── HTTP ────────────────────────────────────────────────

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.registry.len(),
        "agents": state.orchestrator.agents().len(),
    }))
}

async fn stats(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.registry.stats())
}

async fn agents(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.orchestrator.agent_stats())
}

async fn dispatches(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.orchestrator.recent_dispatches())
}

/// Body of `POST /agents/dispatch`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DispatchRequest {
    #[serde(alias = "agent_type")]
    agent_type: String,
    task: Task,
    #[serde(default, alias = "user_id")]
    user_id: Option<String>,
}

async fn dispatch(
    State(state): State<GatewayState>,
    Json(request): Json<DispatchRequest>,
) -> impl IntoResponse {
    let result = state
        .orchestrator
        .dispatch(
            &request.agent_type,
            Arc::new(request.task),
            request.user_id.as_deref(),
        )
        .await;
    Json(result)
}

/// Body of `POST /agents/coordinate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoordinateRequest {
    #[serde(alias = "agent_types")]
    agent_types: Vec<String>,
    task: Task,
    #[serde(default, alias = "user_id")]
    user_id: Option<String>,
}

async fn coordinate(
    State(state): State<GatewayState>,
    Json(request): Json<CoordinateRequest>,
) -> Response {
    if request.agent_types.is_empty() {
        return (StatusCode::BAD_REQUEST, "agentTypes must not be empty").into_response();
    }
    let results = state
        .orchestrator
        .coordinate(
            Arc::new(request.task),
            &request.agent_types,
            request.user_id.as_deref(),
        )
        .await;
    Json(results).into_response()
}

/// Body of `POST /notifications/{user_id}`.
#[derive(Debug, Deserialize)]
struct NotificationRequest {
    title: String,
    #[serde(default)]
    content: serde_json::Value,
}

async fn notify(
    State(state): State<GatewayState>,
    Path(user_id): Path<String>,
    Json(request): Json<NotificationRequest>,
) -> impl IntoResponse {
    let message = OutboundMessage::Notification {
        title: request.title,
        content: request.content,
        timestamp: state.clock.now(),
    };
    let delivered = state.registry.unicast(&user_id, &message).await;
    Json(json!({ "user_id": user_id, "delivered": delivered }))
}
