use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub active_sessions: usize,
    pub active_connections: usize,
    pub sessions: Vec<SessionStatsEntry>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatsEntry {
    pub session_id: String,
    pub members: usize,
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.relay.stats();
    Json(StatsResponse {
        active_sessions: stats.sessions.len(),
        active_connections: stats.active_connections,
        sessions: stats
            .sessions
            .into_iter()
            .map(|entry| SessionStatsEntry {
                session_id: entry.session_id,
                members: entry.members,
            })
            .collect(),
    })
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
