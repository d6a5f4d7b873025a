//! Field sensor ingestion, weather enrichment and irrigation advice.
//!
//! Readings are accepted on a fast path ([`ingest`]), enriched in the
//! background with a weather snapshot and derived indicators
//! ([`enrichment`]), and accumulated into a history the [`advisor`] trains
//! on. [`pipeline::Pipeline`] wires the pieces around one shared
//! [`store::SessionPool`].

pub mod advisor;
pub mod config;
pub mod derive;
pub mod enrichment;
pub mod error;
pub mod features;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod routes;
pub mod schema;
pub mod store;
pub mod weather;

pub use config::Config;
pub use pipeline::{Pipeline, PipelineSettings};
