//! Integration tests for the API layer.
//!
//! These tests spin up a real HTTP server on a random port backed by a
//! coordinator with canned sub-agents and the protocol planner.

use async_trait::async_trait;
use quarry_api::{AppState, create_router};
use quarry_common::{QuarryError, Result, SubAgent, SubAgentOutput};
use quarry_coordinator::{Capabilities, Coordinator, ProtocolPlanner};
use serde_json::{Value, json};
use std::sync::Arc;

/// Sub-agent that answers by looking the request up in a fixed table.
struct CannedAgent {
    name: &'static str,
    answer: fn(&str) -> Result<SubAgentOutput>,
}

#[async_trait]
impl SubAgent for CannedAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, request: &str) -> Result<SubAgentOutput> {
        (self.answer)(request)
    }
}

fn intent(request: &str) -> Result<SubAgentOutput> {
    let reply = match request {
        "hello" => json!({"greeting_message": "Hello! Ask me about the sales data."}),
        "use alloydb" => json!({"use_database": "AlloyDB"}),
        "chart sales" => json!({
            "nl_to_sql_question": "total sales by category",
            "nl_to_python_question": "Create a bar chart of sales by category"
        }),
        _ => json!({}),
    };
    Ok(SubAgentOutput::text(format!("```json\n{reply}\n```")))
}

fn database(_request: &str) -> Result<SubAgentOutput> {
    Ok(SubAgentOutput::text("1 row").with_state(
        "query_result",
        json!([{"category_name": "CANADIAN WHISKIES", "total_sales": 520819727.08}]),
    ))
}

fn analytics(request: &str) -> Result<SubAgentOutput> {
    if !request.contains("CANADIAN WHISKIES") {
        return Err(QuarryError::Agent("no data in prompt".into()));
    }
    Ok(SubAgentOutput::text("Canadian whiskies lead.").with_artifact("sales.png"))
}

/// Spin up a test server on a random port and return the base URL.
async fn start_test_server() -> String {
    let capabilities = Capabilities::new(
        Arc::new(CannedAgent { name: "intent", answer: intent }),
        Arc::new(CannedAgent { name: "database", answer: database }),
        Arc::new(CannedAgent { name: "analytics", answer: analytics }),
    );
    let coordinator = Coordinator::new(capabilities, Arc::new(ProtocolPlanner::new()));
    let state = Arc::new(AppState::new(coordinator));
    let router = create_router(state, Some(vec!["*".to_string()]));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Helper to GET a URL and return (status, body).
async fn get(base: &str, path: &str) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .get(format!("{}{}", base, path))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

/// Helper to POST JSON and return (status, body).
async fn post_json(base: &str, path: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

// ============================================================================
// Health endpoint
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let base = start_test_server().await;
    let (status, body) = get(&base, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["planner"], "protocol");
}

// ============================================================================
// Turns
// ============================================================================

#[tokio::test]
async fn test_greeting_turn() {
    let base = start_test_server().await;
    let (status, body) =
        post_json(&base, "/api/v1/sessions/s-1/turns", json!({"question": "hello"})).await;

    assert_eq!(status, 200);
    assert_eq!(body["answer"], "Hello! Ask me about the sales data.");
    assert_eq!(body["session_id"], "s-1");
    assert_eq!(body["steps"][0]["tool"], "call_intent_understanding");
    assert_eq!(body["steps"][0]["args"]["question"], "hello");
    assert_eq!(body["use_database"], "BigQuery");
}

#[tokio::test]
async fn test_analysis_turn_returns_markdown_answer() {
    let base = start_test_server().await;
    let (status, body) = post_json(
        &base,
        "/api/v1/sessions/s-2/turns",
        json!({"question": "chart sales"}),
    )
    .await;

    assert_eq!(status, 200);
    let steps: Vec<&str> = body["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["tool"].as_str().unwrap())
        .collect();
    assert_eq!(
        steps,
        vec!["call_intent_understanding", "call_db_agent", "call_ds_agent"]
    );

    let answer = body["answer"].as_str().unwrap();
    assert!(answer.contains("**Results overview:**"));
    assert!(answer.contains("**Graph:** sales.png"));
    assert!(answer.contains("Canadian whiskies lead."));

    let (status, session) = get(&base, "/api/v1/sessions/s-2").await;
    assert_eq!(status, 200);
    assert_eq!(session["artifacts"], json!(["sales.png"]));
    assert_eq!(session["turns"], 1);
}

#[tokio::test]
async fn test_database_selection_persists() {
    let base = start_test_server().await;
    let (_, first) = post_json(
        &base,
        "/api/v1/sessions/s-3/turns",
        json!({"question": "use alloydb"}),
    )
    .await;
    assert_eq!(first["answer"], "Using database AlloyDB");

    let (_, second) =
        post_json(&base, "/api/v1/sessions/s-3/turns", json!({"question": "hello"})).await;
    assert_eq!(second["use_database"], "AlloyDB");

    let (_, session) = get(&base, "/api/v1/sessions/s-3").await;
    assert_eq!(session["use_database"], "AlloyDB");
    assert_eq!(session["turns"], 2);
}

#[tokio::test]
async fn test_out_of_scope_turn() {
    let base = start_test_server().await;
    let (status, body) = post_json(
        &base,
        "/api/v1/sessions/s-4/turns",
        json!({"question": "what's the weather?"}),
    )
    .await;
    assert_eq!(status, 200);
    assert!(body["answer"].as_str().unwrap().contains("outside the scope"));
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let base = start_test_server().await;
    let (status, body) =
        post_json(&base, "/api/v1/sessions/s-5/turns", json!({"question": "  "})).await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "EMPTY_QUESTION");
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let base = start_test_server().await;
    let (status, _) =
        post_json(&base, "/api/v1/sessions/s-6/turns", json!({"content": "hi"})).await;
    assert_eq!(status, 422);
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_create_session() {
    let base = start_test_server().await;
    let (status, body) = post_json(&base, "/api/v1/sessions", json!({})).await;
    assert_eq!(status, 201);
    assert_eq!(body["use_database"], "BigQuery");
    assert_eq!(body["turns"], 0);

    let id = body["session_id"].as_str().unwrap();
    let (status, _) = get(&base, &format!("/api/v1/sessions/{id}")).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let base = start_test_server().await;
    let (status, body) = get(&base, "/api/v1/sessions/does-not-exist").await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}
