//! The assembled ingest → enrich → integrate → decide pipeline.
//!
//! Owns the shared pool and hands clones of it to the fast-path writer, the
//! enrichment worker and the feature extractor. The HTTP layer and the
//! end-to-end tests talk to this type only.

use std::sync::Arc;

use crate::advisor::{IrrigationAdvisor, Recommendation, Scenario, TrainingReport};
use crate::enrichment::{EnrichmentDispatcher, EnrichmentWorker};
use crate::error::{AdvisorError, IngestError, StorageError};
use crate::features::FeatureExtractor;
use crate::ingest::{FastPathWriter, IngestReceipt, RawReadingPayload};
use crate::models::{IntegratedObservation, SensorReading, StoredWeatherSnapshot};
use crate::pool::PoolStatus;
use crate::store::{Session, SessionPool};
use crate::weather::WeatherCollector;

/// Tunables that are not pool or weather settings.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Concurrent enrichment cycles; 0 means unbounded.
    pub enrichment_max_concurrent: usize,
    /// Default row cap for a training run.
    pub training_row_limit: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            enrichment_max_concurrent: 8,
            training_row_limit: 1000,
        }
    }
}

pub struct Pipeline<P: SessionPool> {
    pool: P,
    writer: FastPathWriter<P>,
    advisor: Arc<IrrigationAdvisor<P>>,
    settings: PipelineSettings,
}

impl<P: SessionPool> Clone for Pipeline<P> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            writer: self.writer.clone(),
            advisor: self.advisor.clone(),
            settings: self.settings,
        }
    }
}

impl<P: SessionPool> Pipeline<P> {
    pub fn new(pool: P, weather: WeatherCollector, settings: PipelineSettings) -> Self {
        // ---
        let worker = EnrichmentWorker::new(pool.clone(), weather);
        let dispatcher = EnrichmentDispatcher::new(worker, settings.enrichment_max_concurrent);
        let writer = FastPathWriter::new(pool.clone(), dispatcher);
        let advisor = Arc::new(IrrigationAdvisor::new(FeatureExtractor::new(pool.clone())));

        Self {
            pool,
            writer,
            advisor,
            settings,
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub fn advisor(&self) -> &IrrigationAdvisor<P> {
        &self.advisor
    }

    /// Fast path: returns once the raw reading is durable.
    pub async fn ingest(&self, payload: &RawReadingPayload) -> Result<IngestReceipt, IngestError> {
        self.writer.ingest(payload).await
    }

    pub async fn readings(&self, limit: Option<u32>) -> Result<Vec<SensorReading>, StorageError> {
        self.pool.acquire().await?.list_readings(limit).await
    }

    pub async fn weather(&self, limit: Option<u32>) -> Result<Vec<StoredWeatherSnapshot>, StorageError> {
        self.pool.acquire().await?.list_weather(limit).await
    }

    pub async fn integrated(&self, limit: Option<u32>) -> Result<Vec<IntegratedObservation>, StorageError> {
        self.pool.acquire().await?.list_integrated(limit).await
    }

    /// Train on the most recent `limit` rows (configured default if `None`).
    pub async fn train(&self, limit: Option<u32>) -> Result<TrainingReport, AdvisorError> {
        self.advisor
            .train(limit.unwrap_or(self.settings.training_row_limit))
            .await
    }

    pub fn recommend(&self, scenario: &Scenario) -> Result<Recommendation, AdvisorError> {
        self.advisor.recommend(scenario)
    }
}
