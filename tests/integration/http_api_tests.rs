//! Integration tests for the JSON HTTP routes.

use serde_json::{json, Value};

use super::test_helpers::{next_json, test_config, TestGateway};

#[tokio::test]
async fn health_reports_counts() {
    let gw = TestGateway::start(test_config()).await;
    let (_ws, _) = gw.connect("U1", "S1").await;

    let resp = reqwest::get(gw.http("/health")).await.expect("GET /health");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["agents"], 7);
}

#[tokio::test]
async fn stats_lists_connections_per_user() {
    let gw = TestGateway::start(test_config()).await;
    let (_a, _) = gw.connect("U1", "S1").await;
    let (_b, _) = gw.connect("U1", "S2").await;
    let (_c, _) = gw.connect("U2", "S3").await;

    let body: Value = reqwest::get(gw.http("/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total_connections"], 3);
    assert_eq!(body["unique_users"], 2);
    assert_eq!(body["connections_by_user"]["U1"], 2);
    assert_eq!(body["connections_by_user"]["U2"], 1);
}

#[tokio::test]
async fn dispatch_accepts_camel_case_submission() {
    let gw = TestGateway::start(test_config()).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(gw.http("/agents/dispatch"))
        .json(&json!({
            "agentType": "claims_processor",
            "task": {"dataCategories": ["claims"], "payload": {"claim_id": "C-1"}},
            "userId": "U1"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "success");
    assert_eq!(body["agent_type"], "claims_processor");

    let records: Value = reqwest::get(gw.http("/agents/dispatches"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["requester"], "U1");
    assert_eq!(records[0]["outcome"], "success");
    assert!(records[0].get("payload").is_none());
}

#[tokio::test]
async fn dispatch_to_unknown_agent_is_a_typed_failure() {
    let gw = TestGateway::start(test_config()).await;
    let body: Value = reqwest::Client::new()
        .post(gw.http("/agents/dispatch"))
        .json(&json!({"agentType": "nonexistent_agent", "task": {"payload": {}}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "failure");
    assert_eq!(body["error"], "agent_not_found");
}

#[tokio::test]
async fn coordinate_returns_per_agent_map() {
    let gw = TestGateway::start(test_config()).await;
    let body: Value = reqwest::Client::new()
        .post(gw.http("/agents/coordinate"))
        .json(&json!({
            "agentTypes": ["claims_processor", "document_analyzer"],
            "task": {"dataCategories": ["claims"], "payload": {}}
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let results = &body["coordinated_results"];
    assert_eq!(results["claims_processor"]["status"], "success");
    assert_eq!(results["document_analyzer"]["error"], "permission_denied");
}

#[tokio::test]
async fn coordinate_without_agents_is_bad_request() {
    let gw = TestGateway::start(test_config()).await;
    let resp = reqwest::Client::new()
        .post(gw.http("/agents/coordinate"))
        .json(&json!({"agentTypes": [], "task": {"payload": {}}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn agents_route_reports_every_registered_agent() {
    let gw = TestGateway::start(test_config()).await;
    let body: Value = reqwest::get(gw.http("/agents"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let agents = body.as_array().unwrap();
    assert_eq!(agents.len(), 7);
    assert!(agents.iter().all(|a| a["request_count"] == 0));
}

#[tokio::test]
async fn notification_is_unicast_to_user() {
    let gw = TestGateway::start(test_config()).await;
    let (mut ws, _) = gw.connect("U1", "S1").await;
    let (_other, _) = gw.connect("U2", "S2").await;

    let body: Value = reqwest::Client::new()
        .post(gw.http("/notifications/U1"))
        .json(&json!({"title": "Exam scheduled", "content": {"date": "2026-11-02"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["delivered"], 1);

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["title"], "Exam scheduled");
    assert_eq!(frame["content"]["date"], "2026-11-02");
}
