//! Read endpoints over the three record sets, newest first.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::errors::storage_error_to_response;
use crate::store::SessionPool;
use crate::Pipeline;

// ---

pub fn router<P: SessionPool>() -> Router<Pipeline<P>> {
    // ---
    Router::new()
        .route("/readings", get(readings::<P>))
        .route("/weather", get(weather::<P>))
        .route("/integrated", get(integrated::<P>))
}

/// `?limit=N` caps the number of rows returned.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    limit: Option<u32>,
}

async fn readings<P: SessionPool>(
    State(pipeline): State<Pipeline<P>>,
    Query(params): Query<ListQuery>,
) -> Response {
    // ---
    match pipeline.readings(params.limit).await {
        Ok(rows) => {
            info!("GET /readings - returning {} rows", rows.len());
            Json(rows).into_response()
        }
        Err(e) => storage_error_to_response(e),
    }
}

async fn weather<P: SessionPool>(
    State(pipeline): State<Pipeline<P>>,
    Query(params): Query<ListQuery>,
) -> Response {
    // ---
    match pipeline.weather(params.limit).await {
        Ok(rows) => {
            info!("GET /weather - returning {} rows", rows.len());
            Json(rows).into_response()
        }
        Err(e) => storage_error_to_response(e),
    }
}

async fn integrated<P: SessionPool>(
    State(pipeline): State<Pipeline<P>>,
    Query(params): Query<ListQuery>,
) -> Response {
    // ---
    match pipeline.integrated(params.limit).await {
        Ok(rows) => {
            info!("GET /integrated - returning {} rows", rows.len());
            Json(rows).into_response()
        }
        Err(e) => storage_error_to_response(e),
    }
}
