// src/health.rs

//! `GET /health`: liveness probe, grounded on
//! `original_source/services/web-gateway/gateway/routes/health.py`. No
//! auth — this is the one route operators need to reach even when the
//! broker is unreachable.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::state::GatewayState;

pub async fn health_check(State(state): State<GatewayState>) -> impl IntoResponse {
    match state.broker.scan_statuses().await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "healthy"}))),
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "unhealthy"})))
        }
    }
}
