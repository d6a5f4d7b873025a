//! Ingestion endpoints.
//!
//! `GET /data` takes the reading as query parameters, which is what the
//! field node firmware sends. `POST /readings` takes the same fields as
//! JSON. Both return as soon as the raw reading is stored.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use super::errors::{ingest_error_to_response, json_error};
use crate::error::IngestError;
use crate::ingest::RawReadingPayload;
use crate::store::SessionPool;
use crate::Pipeline;

// ---

pub fn router<P: SessionPool>() -> Router<Pipeline<P>> {
    // ---
    Router::new()
        .route("/data", get(ingest_query::<P>))
        .route("/readings", post(ingest_json::<P>))
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    status: &'static str,
    reading_id: i64,
    received_at: DateTime<Utc>,
}

async fn ingest_query<P: SessionPool>(
    State(pipeline): State<Pipeline<P>>,
    Query(payload): Query<RawReadingPayload>,
) -> Response {
    // ---
    debug!("GET /data - {:?}", payload);
    accept(&pipeline, &payload).await
}

async fn ingest_json<P: SessionPool>(
    State(pipeline): State<Pipeline<P>>,
    body: Result<Json<RawReadingPayload>, JsonRejection>,
) -> Response {
    // ---
    let Json(payload) = match body {
        Ok(body) => body,
        Err(rejection) => return json_error(rejection.status(), "invalid_body", rejection.body_text()),
    };
    debug!("POST /readings - {:?}", payload);
    accept(&pipeline, &payload).await
}

async fn accept<P: SessionPool>(pipeline: &Pipeline<P>, payload: &RawReadingPayload) -> Response {
    // ---
    match pipeline.ingest(payload).await {
        // The enrichment handle is dropped; the cycle keeps running.
        Ok(receipt) => (
            StatusCode::CREATED,
            Json(IngestResponse {
                status: "stored",
                reading_id: receipt.reading.id,
                received_at: receipt.reading.received_at,
            }),
        )
            .into_response(),
        Err(e) => {
            if let IngestError::Storage(storage) = &e {
                error!("Failed to store reading: {}", storage);
            }
            ingest_error_to_response(e)
        }
    }
}
