//! `/health` liveness endpoint.
//!
//! Reports pool occupancy alongside the status so an operator can see
//! exhaustion without reading logs. Does not touch storage.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::pool::PoolStatus;
use crate::store::SessionPool;
use crate::Pipeline;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    pool: PoolStatus,
}

async fn health<P: SessionPool>(State(pipeline): State<Pipeline<P>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pool: pipeline.pool_status(),
    })
}

/// Subrouter with the single `GET /health` route.
pub fn router<P: SessionPool>() -> Router<Pipeline<P>> {
    Router::new().route("/health", get(health::<P>))
}
