//! Liveness endpoint for the checkout service.

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health — liveness probe; says nothing about store reachability.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
