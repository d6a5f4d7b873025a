//! Error taxonomy for the ingest → enrich → integrate → decide pipeline.
//!
//! Only the fast path and the advisor surface errors to callers. Weather
//! errors are always recovered inside `weather`, and enrichment failures end
//! their own cycle and are logged, never propagated.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::enrichment::CycleState;

/// A raw reading payload could not be normalized. Nothing is persisted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("field `{field}` must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("field `{field}` must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Storage-side failure: pool checkout or a backend write/read.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Live weather lookup failure. Always recovered by the synthetic model.
#[derive(Debug, Error)]
pub enum WeatherSourceError {
    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("weather request timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed weather response: {0}")]
    Malformed(String),
}

/// Too few rows to train or extract a feature table.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("insufficient data: {available} rows available, at least {required} required")]
pub struct InsufficientDataError {
    pub available: usize,
    pub required: usize,
}

/// Terminal failure of one enrichment cycle.
#[derive(Debug, Error)]
#[error("enrichment cycle {cycle_id} for reading {reading_id} failed while {state}: {source}")]
pub struct EnrichmentFailure {
    pub cycle_id: Uuid,
    pub reading_id: i64,
    pub state: CycleState,
    #[source]
    pub source: StorageError,
}

/// Errors returned synchronously by the fast path.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors returned by training and recommendation.
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InsufficientData(#[from] InsufficientDataError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("no model has been trained yet")]
    NotTrained,
}
