//! End-to-end single-session enforcement.

use serde_json::json;

use super::test_helpers::{next_json, test_config, wait_closed, TestGateway};

#[tokio::test]
async fn second_connection_on_session_closes_the_first() {
    let gw = TestGateway::start(test_config()).await;
    let (mut first, first_established) = gw.connect("U1", "S1").await;
    let (_second, second_established) = gw.connect("U1", "S1").await;

    let leftover = wait_closed(&mut first).await;
    assert!(leftover.is_empty(), "unexpected frames: {leftover:?}");

    gw.wait_for_connections(1).await;
    let occupant = gw.ctx.registry().session_occupant("S1").expect("occupant");
    assert_eq!(
        occupant.id(),
        second_established["connection_id"].as_str().unwrap()
    );
    assert!(gw
        .ctx
        .registry()
        .get(first_established["connection_id"].as_str().unwrap())
        .is_none());
}

#[tokio::test]
async fn session_messages_reach_only_the_new_connection() {
    let gw = TestGateway::start(test_config()).await;
    let (mut first, _) = gw.connect("U1", "S1").await;
    let (mut second, _) = gw.connect("U1", "S1").await;
    wait_closed(&mut first).await;

    let notification = qbit_gateway::models::message::OutboundMessage::Notification {
        title: "decision ready".into(),
        content: json!({"claim_id": "C-9"}),
        timestamp: chrono::Utc::now(),
    };
    assert!(gw.ctx.registry().send_to_session("S1", &notification).await);

    let frame = next_json(&mut second).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["title"], "decision ready");
}

#[tokio::test]
async fn multi_session_admission_keeps_both() {
    let gw = TestGateway::start(test_config()).await;
    let (_first, _) = gw
        .connect_query("user_id=U1&session_id=S1&single_session=false")
        .await;
    let (_second, _) = gw
        .connect_query("user_id=U1&session_id=S1&single_session=false")
        .await;

    gw.wait_for_connections(2).await;
    let stats = gw.ctx.registry().stats();
    assert_eq!(stats.unique_users, 1);
    assert_eq!(stats.connections_by_user.get("U1"), Some(&2));
}

#[tokio::test]
async fn distinct_sessions_of_one_user_coexist() {
    let gw = TestGateway::start(test_config()).await;
    let (mut a, _) = gw.connect("U1", "S1").await;
    let (mut b, _) = gw.connect("U1", "S2").await;
    gw.wait_for_connections(2).await;

    let delivered = gw
        .ctx
        .registry()
        .unicast(
            "U1",
            &qbit_gateway::models::message::OutboundMessage::Notification {
                title: "hello".into(),
                content: json!(null),
                timestamp: chrono::Utc::now(),
            },
        )
        .await;
    assert_eq!(delivered, 2);
    assert_eq!(next_json(&mut a).await["type"], "notification");
    assert_eq!(next_json(&mut b).await["type"], "notification");
}
