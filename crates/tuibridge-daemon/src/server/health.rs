//! Liveness endpoint.

use axum::Json;
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

/// Answers as long as the daemon is serving; sessions are not inspected.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}
