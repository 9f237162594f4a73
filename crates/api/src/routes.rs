//! HTTP route handlers for the API.

use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quarry_common::AgentMessage;
use quarry_coordinator::{SessionSummary, TurnStep};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub planner: String,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        planner: state.coordinator.planner_kind().to_string(),
    })
}

/// Turn request body.
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub question: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Turn response body.
#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub id: String,
    pub session_id: String,
    pub answer: String,
    pub steps: Vec<TurnStep>,
    pub use_database: Option<String>,
}

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    pub code: &'static str,
}

impl ErrorResponse {
    fn new(status: StatusCode, code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            code,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Open a session under a generated id.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SessionSummary>) {
    let session = state.sessions.create().await;
    let summary = session.lock().await.summary().await;
    info!(session_id = %summary.session_id, "Session opened");
    (StatusCode::CREATED, Json(summary))
}

/// Ask a question within a session; unknown ids open a new session.
pub async fn post_turn(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ErrorResponse> {
    if request.question.trim().is_empty() {
        return Err(ErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "EMPTY_QUESTION",
            "question must not be empty",
        ));
    }

    info!(
        session_id = %session_id,
        question_preview = %request.question.chars().take(50).collect::<String>(),
        "Received turn"
    );

    let mut message = AgentMessage::user(&request.question).in_session(&session_id);
    if let Some(metadata) = request.metadata {
        message.metadata = metadata;
    }

    let session = state.sessions.get_or_create(&session_id).await;
    // Turns of one session run one at a time
    let mut session = session.lock().await;

    let outcome = state
        .coordinator
        .handle_turn(&mut session, message)
        .await
        .map_err(|e| {
            error!(session_id = %session_id, error = %e, "Turn failed");
            ErrorResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "TURN_FAILED",
                format!("Turn failed: {e}"),
            )
        })?;

    Ok(Json(TurnResponse {
        id: outcome.reply.id,
        session_id,
        answer: outcome.reply.content,
        steps: outcome.steps,
        use_database: outcome.use_database,
    }))
}

/// Get session status.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, ErrorResponse> {
    debug!(session_id = %session_id, "Getting session status");

    let session = state.sessions.get(&session_id).await.ok_or_else(|| {
        ErrorResponse::new(
            StatusCode::NOT_FOUND,
            "SESSION_NOT_FOUND",
            format!("No session '{session_id}'"),
        )
    })?;

    let summary = session.lock().await.summary().await;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            version: "0.1.0",
            uptime_seconds: 100,
            planner: "protocol".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("protocol"));
    }

    #[test]
    fn test_turn_request_deserialization() {
        let json = r#"{"question": "top 5 stores by sales"}"#;
        let request: TurnRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.question, "top 5 stores by sales");
        assert!(request.metadata.is_none());
    }

    #[test]
    fn test_error_response_hides_status() {
        let err = ErrorResponse::new(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", "missing");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "SESSION_NOT_FOUND");
        assert!(json.get("status").is_none());
    }
}
