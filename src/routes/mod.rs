//! HTTP gateway. Each sibling module exports a subrouter; this module merges
//! them and attaches the shared pipeline as state.

use axum::Router;

use crate::store::SessionPool;
use crate::Pipeline;

mod errors;
mod health;
mod ingest;
mod model;
mod records;

// ---

pub fn router<P: SessionPool>(pipeline: Pipeline<P>) -> Router {
    // ---
    Router::new()
        .merge(ingest::router::<P>())
        .merge(records::router::<P>())
        .merge(model::router::<P>())
        .merge(health::router::<P>())
        .with_state(pipeline)
}
