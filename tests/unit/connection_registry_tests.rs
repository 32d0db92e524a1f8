//! Unit tests for `ConnectionRegistry`: admission, single-session takeover,
//! idempotent eviction, unicast, and stats.

use std::sync::Arc;
use std::time::Duration;

use qbit_gateway::clock::ManualClock;
use qbit_gateway::gateway::{
    ChannelTransport, ConnectionRegistry, ConnectionState, OutboundFrame,
};
use qbit_gateway::models::message::OutboundMessage;
use tokio::sync::mpsc;

fn registry() -> ConnectionRegistry {
    ConnectionRegistry::new(
        Arc::new(ManualClock::starting_now()),
        Duration::from_millis(200),
    )
}

fn transport() -> (Arc<ChannelTransport>, mpsc::Receiver<OutboundFrame>) {
    let (transport, rx) = ChannelTransport::new(16);
    (Arc::new(transport), rx)
}

fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn frame_type(frame: &OutboundFrame) -> String {
    match frame {
        OutboundFrame::Text(text) => {
            let value: serde_json::Value = serde_json::from_str(text).expect("json frame");
            value["type"].as_str().expect("type").to_owned()
        }
        OutboundFrame::Close => "close".into(),
    }
}

fn notification() -> OutboundMessage {
    OutboundMessage::Notification {
        title: "claim update".into(),
        content: serde_json::json!({"claim": "C-1"}),
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn admit_sends_connection_established() {
    let registry = registry();
    let (t, mut rx) = transport();
    let conn = registry.admit(t, "U1", "S1", true).await.expect("admit");

    assert_eq!(conn.state(), ConnectionState::Open);
    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    let OutboundFrame::Text(text) = &frames[0] else {
        panic!("expected text frame");
    };
    let value: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(value["type"], "connection_established");
    assert_eq!(value["connection_id"], conn.id());
    assert_eq!(value["session_id"], "S1");
}

#[tokio::test]
async fn single_session_takeover_closes_prior_connection() {
    let registry = registry();
    let (t1, mut rx1) = transport();
    let (t2, mut rx2) = transport();

    let old = registry.admit(t1, "U1", "S1", true).await.unwrap();
    let new = registry.admit(t2, "U1", "S1", true).await.unwrap();

    assert_ne!(old.id(), new.id());
    assert_eq!(old.state(), ConnectionState::Closed);
    assert!(old.is_closed());
    assert!(registry.get(old.id()).is_none());
    assert_eq!(registry.len(), 1);

    let old_frames: Vec<String> = drain(&mut rx1).iter().map(frame_type).collect();
    assert_eq!(old_frames, ["connection_established", "close"]);

    drain(&mut rx2);
    assert!(registry.send_to_session("S1", &notification()).await);
    let new_frames: Vec<String> = drain(&mut rx2).iter().map(frame_type).collect();
    assert_eq!(new_frames, ["notification"]);
    assert!(registry.is_consistent());
}

#[tokio::test]
async fn multi_session_keeps_prior_connection_reachable_by_user() {
    let registry = registry();
    let (t1, _rx1) = transport();
    let (t2, _rx2) = transport();

    let old = registry.admit(t1, "U1", "S1", false).await.unwrap();
    let new = registry.admit(t2, "U1", "S1", false).await.unwrap();

    assert_eq!(old.state(), ConnectionState::Open);
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.session_occupant("S1").map(|c| c.id().to_owned()),
        Some(new.id().to_owned())
    );
    assert_eq!(registry.unicast("U1", &notification()).await, 2);
    assert!(registry.is_consistent());

    // Evicting the displaced connection must not free the slot held by the new one.
    assert!(registry.evict(old.id()).await);
    assert!(registry.session_occupant("S1").is_some());
    assert!(registry.is_consistent());
}

#[tokio::test]
async fn session_slot_passes_to_surviving_connection() {
    let clock = Arc::new(ManualClock::starting_now());
    let registry = ConnectionRegistry::new(clock.clone(), Duration::from_millis(200));
    let (t1, mut rx1) = transport();
    let (t2, _rx2) = transport();
    let (t3, _rx3) = transport();

    let first = registry.admit(t1, "U1", "S1", false).await.unwrap();
    clock.advance(Duration::from_secs(1));
    let second = registry.admit(t2, "U1", "S1", false).await.unwrap();
    clock.advance(Duration::from_secs(1));
    let third = registry.admit(t3, "U1", "S1", false).await.unwrap();
    drain(&mut rx1);

    assert!(registry.evict(third.id()).await);
    assert_eq!(
        registry.session_occupant("S1").map(|c| c.id().to_owned()),
        Some(second.id().to_owned()),
        "newest survivor takes the slot"
    );
    assert!(registry.is_consistent());

    assert!(registry.evict(second.id()).await);
    assert!(registry.send_to_session("S1", &notification()).await);
    let frames = drain(&mut rx1);
    assert_eq!(frames.len(), 1);
    assert_eq!(frame_type(&frames[0]), "notification");
    assert!(registry.get(first.id()).is_some());

    assert!(registry.evict(first.id()).await);
    assert!(registry.session_occupant("S1").is_none());
    assert!(!registry.send_to_session("S1", &notification()).await);
    assert!(registry.is_consistent());
}

#[tokio::test]
async fn evict_is_idempotent() {
    let registry = registry();
    let (t, _rx) = transport();
    let conn = registry.admit(t, "U1", "S1", true).await.unwrap();

    assert!(registry.evict(conn.id()).await);
    assert!(!registry.evict(conn.id()).await);
    assert!(!registry.evict("never-existed").await);
    assert!(registry.is_empty());
    assert!(registry.stats().connections_by_user.is_empty());
}

#[tokio::test]
async fn concurrent_evictions_close_once() {
    let registry = Arc::new(registry());
    let (t, mut rx) = transport();
    let conn = registry.admit(t, "U1", "S1", true).await.unwrap();
    drain(&mut rx);

    let evictions = (0..8).map(|_| {
        let registry = Arc::clone(&registry);
        let id = conn.id().to_owned();
        tokio::spawn(async move { registry.evict(&id).await })
    });
    let results = futures_util::future::join_all(evictions).await;
    let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

    assert_eq!(winners, 1);
    let closes = drain(&mut rx)
        .into_iter()
        .filter(|f| *f == OutboundFrame::Close)
        .count();
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn eviction_clears_every_index() {
    let registry = registry();
    let (t1, _rx1) = transport();
    let (t2, _rx2) = transport();
    let a = registry.admit(t1, "U1", "S1", true).await.unwrap();
    let _b = registry.admit(t2, "U1", "S2", true).await.unwrap();

    registry.evict(a.id()).await;

    let stats = registry.stats();
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.connections_by_user.get("U1"), Some(&1));
    assert!(registry.session_occupant("S1").is_none());
    assert!(!registry.send_to_session("S1", &notification()).await);
    assert!(registry.is_consistent());
}

#[tokio::test]
async fn unicast_evicts_only_failing_connections() {
    let registry = registry();
    let (healthy, mut healthy_rx) = transport();
    let (broken, broken_rx) = transport();
    let (other_user, mut other_rx) = transport();

    let ok = registry.admit(healthy, "U1", "S1", true).await.unwrap();
    let bad = registry.admit(broken, "U1", "S2", true).await.unwrap();
    registry.admit(other_user, "U2", "S3", true).await.unwrap();
    drop(broken_rx);
    drain(&mut healthy_rx);
    drain(&mut other_rx);

    let delivered = registry.unicast("U1", &notification()).await;

    assert_eq!(delivered, 1);
    assert!(registry.get(ok.id()).is_some());
    assert!(registry.get(bad.id()).is_none());
    assert_eq!(drain(&mut healthy_rx).len(), 1);
    assert!(drain(&mut other_rx).is_empty(), "other users must not receive it");
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn send_to_session_evicts_on_failure() {
    let registry = registry();
    let (t, rx) = transport();
    let conn = registry.admit(t, "U1", "S1", true).await.unwrap();
    drop(rx);

    assert!(!registry.send_to_session("S1", &notification()).await);
    assert!(registry.get(conn.id()).is_none());
}

#[tokio::test]
async fn admit_fails_when_established_frame_cannot_be_sent() {
    let registry = registry();
    let (t, rx) = transport();
    drop(rx);

    let err = registry.admit(t, "U1", "S1", true).await.unwrap_err();
    assert!(err.to_string().starts_with("transport:"));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn readmit_after_evict_creates_new_identity() {
    let registry = registry();
    let (t1, _rx1) = transport();
    let (t2, _rx2) = transport();

    let first = registry.admit(t1, "U1", "S1", true).await.unwrap();
    registry.evict(first.id()).await;
    let second = registry.admit(t2, "U1", "S1", true).await.unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(first.state(), ConnectionState::Closed);
    assert!(first.send(&notification()).await.is_err());
}

#[tokio::test]
async fn concurrent_admits_leave_one_connection_per_session() {
    let registry = Arc::new(registry());
    let mut receivers = Vec::new();
    let mut admits = Vec::new();
    for i in 0..16 {
        let (t, rx) = transport();
        receivers.push(rx);
        let registry = Arc::clone(&registry);
        let session = format!("S{}", i % 4);
        admits.push(tokio::spawn(async move {
            registry.admit(t, "U1", &session, true).await
        }));
    }
    // An admit may lose its slot to a later one before its first frame is
    // sent; that admit reports a transport error and is not counted.
    for admit in futures_util::future::join_all(admits).await {
        let _ = admit.expect("admit task panicked");
    }

    let stats = registry.stats();
    assert_eq!(stats.total_connections, 4);
    for i in 0..4 {
        assert!(registry.session_occupant(&format!("S{i}")).is_some());
    }
    assert!(registry.is_consistent());
}

#[tokio::test]
async fn stats_counts_users_and_connections() {
    let registry = registry();
    let mut keep = Vec::new();
    for (user, session) in [("U1", "S1"), ("U1", "S2"), ("U2", "S3")] {
        let (t, rx) = transport();
        keep.push(rx);
        registry.admit(t, user, session, true).await.unwrap();
    }

    let stats = registry.stats();
    assert_eq!(stats.total_connections, 3);
    assert_eq!(stats.unique_users, 2);
    assert_eq!(stats.connections_by_user.get("U1"), Some(&2));
    assert_eq!(stats.connections_by_user.get("U2"), Some(&1));
}

#[tokio::test]
async fn evict_all_empties_registry() {
    let registry = registry();
    let mut keep = Vec::new();
    for session in ["S1", "S2", "S3"] {
        let (t, rx) = transport();
        keep.push(rx);
        registry.admit(t, "U1", session, true).await.unwrap();
    }

    assert_eq!(registry.evict_all().await, 3);
    assert!(registry.is_empty());
    assert_eq!(registry.evict_all().await, 0);
}
