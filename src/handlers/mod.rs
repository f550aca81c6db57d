//! Diagnostics HTTP handlers.
//!
//! Read-only views over the session registry: process health, per-session
//! health, call listings and per-call logs. Nothing here mutates a call.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::session::{ActivityRecord, AiResponseRecord, SessionSummary, epoch_ms};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub region: String,
    pub active_sessions: usize,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        region: state.config.region.clone(),
        active_sessions: state.registry.len(),
    })
}

#[derive(Debug, Serialize)]
pub struct SessionHealthResponse {
    #[serde(flatten)]
    pub summary: SessionSummary,
    /// Seconds until the idle timer ends the call, measured from the last
    /// AI response (session start if none yet). 0 once closed or overdue.
    pub idle_timeout_remaining_secs: u64,
}

/// `GET /health/{session_id}` - health of one session, including how much
/// of the idle window remains.
pub async fn session_health(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionHealthResponse>, StatusCode> {
    let session = state.registry.get(&session_id).ok_or(StatusCode::NOT_FOUND)?;
    let summary = session.summary();

    let idle_timeout_remaining_secs = if summary.status == "closed" {
        0
    } else {
        let baseline = summary.last_ai_response_ms.unwrap_or(summary.created_at_ms);
        let elapsed_secs = epoch_ms().saturating_sub(baseline) / 1000;
        state.config.idle_timeout_secs.saturating_sub(elapsed_secs)
    };

    Ok(Json(SessionHealthResponse {
        summary,
        idle_timeout_remaining_secs,
    }))
}

#[derive(Debug, Deserialize, Default)]
pub struct CallsQuery {
    /// Filter by caller identity.
    pub caller_id: Option<String>,
    /// Filter by upstream correlation id.
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallsResponse {
    pub calls: Vec<SessionSummary>,
}

/// `GET /calls` - summaries, optionally filtered by caller or correlation id.
pub async fn list_calls(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallsQuery>,
) -> Json<CallsResponse> {
    let calls = state
        .registry
        .find(query.caller_id.as_deref(), query.correlation_id.as_deref())
        .iter()
        .map(|s| s.summary())
        .collect();
    Json(CallsResponse { calls })
}

#[derive(Debug, Serialize)]
pub struct CallLogResponse {
    pub session_id: String,
    pub activity: Vec<ActivityRecord>,
    pub ai_responses: Vec<AiResponseRecord>,
}

/// `GET /calls/{session_id}/log` - the full activity and AI-response log.
pub async fn call_log(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<CallLogResponse>, StatusCode> {
    let session = state.registry.get(&session_id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(CallLogResponse {
        session_id,
        activity: session.activity_log(),
        ai_responses: session.ai_responses(),
    }))
}
