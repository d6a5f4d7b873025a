//! Training and recommendation endpoints.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::errors::{advisor_error_to_response, json_error};
use crate::advisor::Scenario;
use crate::store::SessionPool;
use crate::Pipeline;

// ---

pub fn router<P: SessionPool>() -> Router<Pipeline<P>> {
    // ---
    Router::new()
        .route("/model/train", post(train::<P>))
        .route("/model/recommend", post(recommend::<P>))
}

/// `POST /model/train?limit=N` overrides the configured row limit.
#[derive(Debug, Default, Deserialize)]
pub struct TrainQuery {
    limit: Option<u32>,
}

async fn train<P: SessionPool>(
    State(pipeline): State<Pipeline<P>>,
    Query(params): Query<TrainQuery>,
) -> Response {
    // ---
    let limit = params.limit;
    info!("POST /model/train - limit {:?}", limit);

    match pipeline.train(limit).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => advisor_error_to_response(e),
    }
}

async fn recommend<P: SessionPool>(
    State(pipeline): State<Pipeline<P>>,
    body: Result<Json<Scenario>, JsonRejection>,
) -> Response {
    // ---
    let scenario = match body {
        Ok(Json(scenario)) => scenario,
        Err(rejection) => return json_error(rejection.status(), "invalid_body", rejection.body_text()),
    };

    match pipeline.recommend(&scenario) {
        Ok(recommendation) => Json(recommendation).into_response(),
        Err(e) => advisor_error_to_response(e),
    }
}
