//! End-to-end tests over a real WebSocket: admission, routing, error
//! frames, rate limiting, and disconnect cleanup.

use futures_util::SinkExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::{self, Message};

use super::test_helpers::{next_json, send_json, test_config, TestGateway};

#[tokio::test]
async fn established_frame_names_connection_and_session() {
    let gw = TestGateway::start(test_config()).await;
    let (_ws, established) = gw.connect("U1", "S1").await;

    assert_eq!(established["session_id"], "S1");
    let connection_id = established["connection_id"].as_str().unwrap();
    let conn = gw.ctx.registry().get(connection_id).expect("registered");
    assert_eq!(conn.user_id(), "U1");
}

#[tokio::test]
async fn ping_is_answered_with_heartbeat() {
    let gw = TestGateway::start(test_config()).await;
    let (mut ws, _) = gw.connect("U1", "S1").await;

    send_json(&mut ws, &json!({"type": "ping", "content": ""})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "heartbeat");
}

#[tokio::test]
async fn chat_is_routed_to_mapped_agent() {
    let gw = TestGateway::start(test_config()).await;
    let (mut ws, _) = gw.connect("U1", "S1").await;

    send_json(
        &mut ws,
        &json!({
            "type": "chat",
            "content": "status of my claim",
            "message_type": "claim_query",
            "context": {"data_categories": ["claims"]}
        }),
    )
    .await;
    let reply = next_json(&mut ws).await;

    assert_eq!(reply["type"], "agent_response");
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["agent_type"], "claims_processor");
    assert!(reply["agent_id"].is_string());
    assert!(reply["timestamp"].is_string());
}

#[tokio::test]
async fn malformed_frame_gets_error_and_connection_survives() {
    let gw = TestGateway::start(test_config()).await;
    let (mut ws, _) = gw.connect("U1", "S1").await;

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["error"], "invalid_message");

    send_json(&mut ws, &json!({"content": "no type"})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["error"], "invalid_message");

    send_json(&mut ws, &json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut ws).await["type"], "heartbeat");
}

#[tokio::test]
async fn binary_frames_are_rejected() {
    let gw = TestGateway::start(test_config()).await;
    let (mut ws, _) = gw.connect("U1", "S1").await;

    ws.send(Message::Binary(vec![1_u8, 2, 3].into())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["error"], "invalid_message");
}

#[tokio::test]
async fn fourth_message_in_window_is_rate_limited() {
    let mut config = test_config();
    config.connection.max_messages = 3;
    let gw = TestGateway::start(config).await;
    let (mut ws, _) = gw.connect("U1", "S1").await;

    for _ in 0..4 {
        send_json(&mut ws, &json!({"type": "ping"})).await;
    }
    let mut heartbeats = 0;
    let mut limited = 0;
    for _ in 0..4 {
        let reply = next_json(&mut ws).await;
        match reply["type"].as_str() {
            Some("heartbeat") => heartbeats += 1,
            Some("error") => {
                assert_eq!(reply["error"], "rate_limit_exceeded");
                limited += 1;
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert_eq!((heartbeats, limited), (3, 1));
}

#[tokio::test]
async fn missing_identity_is_rejected_before_upgrade() {
    let gw = TestGateway::start(test_config()).await;

    let err = tokio_tungstenite::connect_async(gw.ws_url("user_id=U1"))
        .await
        .expect_err("handshake must fail");
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status().as_u16(), 400),
        other => panic!("expected HTTP 400, got {other}"),
    }
    assert!(gw.ctx.registry().is_empty());
}

#[tokio::test]
async fn client_close_evicts_connection() {
    let gw = TestGateway::start(test_config()).await;
    let (mut ws, _) = gw.connect("U1", "S1").await;
    gw.wait_for_connections(1).await;

    ws.close(None).await.unwrap();
    gw.wait_for_connections(0).await;
    assert!(gw.ctx.registry().session_occupant("S1").is_none());
}
