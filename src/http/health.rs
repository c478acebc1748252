//! Liveness, readiness, and metrics endpoints (spec §6).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::AppState;

pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness probes the database; provider adapters are fire-and-log at
/// dispatch time so they never block readiness in demo mode (mocks are
/// always ready) and only fail readiness when the DB itself is down.
pub async fn readiness(State(state): State<AppState>) -> Response {
    match sqlx::query("SELECT 1").execute(&state.dispatcher.db).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "reason": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.set_gauge("mcp_uptime_seconds", &[], state.metrics.uptime_seconds() as i64);
    let (active_count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM agent_channels WHERE status = 'active'",
    )
    .fetch_one(&state.dispatcher.db)
    .await
    .unwrap_or((0,));
    state.metrics.set_gauge("mcp_active_agents", &[], active_count);

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}
