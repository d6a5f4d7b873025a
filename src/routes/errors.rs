//! Mapping of pipeline errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{AdvisorError, IngestError, StorageError};

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn storage_error_to_response(err: StorageError) -> Response {
    // ---
    match err {
        StorageError::PoolExhausted { .. } | StorageError::PoolClosed => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "pool_unavailable", err.to_string())
        }
        StorageError::Database(_) | StorageError::Backend(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", err.to_string())
        }
    }
}

pub fn ingest_error_to_response(err: IngestError) -> Response {
    match err {
        IngestError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        IngestError::Storage(e) => storage_error_to_response(e),
    }
}

pub fn advisor_error_to_response(err: AdvisorError) -> Response {
    // ---
    match err {
        AdvisorError::InsufficientData(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "insufficient_data", e.to_string())
        }
        AdvisorError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        AdvisorError::NotTrained => json_error(StatusCode::CONFLICT, "not_trained", err.to_string()),
        AdvisorError::Storage(e) => storage_error_to_response(e),
    }
}
