//! Fast-path writer: validate, persist the raw row, hand off, return.
//!
//! The only awaited I/O on this path is the pool checkout and the single
//! insert. Enrichment is submitted to the dispatcher afterwards and never
//! awaited here. `received_at` is stamped by the store inside the insert, so
//! two racing ingests can never commit out of stamp order.

use chrono::Utc;
use tokio::task::JoinHandle;

use super::parse::RawReadingPayload;
use crate::enrichment::{CycleReport, EnrichmentDispatcher};
use crate::error::IngestError;
use crate::models::SensorReading;
use crate::store::{Session, SessionPool};

/// Outcome of one accepted reading.
#[derive(Debug)]
pub struct IngestReceipt {
    /// The durable raw row.
    pub reading: SensorReading,
    /// Handle of the scheduled enrichment cycle. Dropping it does not cancel
    /// the cycle.
    pub enrichment: JoinHandle<CycleReport>,
}

/// Accepts raw readings on the caller's task.
pub struct FastPathWriter<P: SessionPool> {
    pool: P,
    dispatcher: EnrichmentDispatcher<P>,
}

impl<P: SessionPool> Clone for FastPathWriter<P> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<P: SessionPool> FastPathWriter<P> {
    pub fn new(pool: P, dispatcher: EnrichmentDispatcher<P>) -> Self {
        Self { pool, dispatcher }
    }

    /// Validate, persist and schedule enrichment for one reading.
    ///
    /// Returns once the raw row is durable. Validation errors persist
    /// nothing; storage errors leave nothing partial behind since a single
    /// row is written.
    pub async fn ingest(&self, payload: &RawReadingPayload) -> Result<IngestReceipt, IngestError> {
        // ---
        let new_reading = payload.normalize(Utc::now()).inspect_err(|e| {
            tracing::warn!("Rejected reading: {}", e);
        })?;

        let reading = {
            let mut session = self.pool.acquire().await?;
            session.insert_reading(&new_reading).await?
        };

        tracing::info!(
            "Stored reading {} (moisture {}, pump {}, skew {}s)",
            reading.id,
            reading.soil_moisture,
            reading.pump_on,
            reading.clock_skew_seconds()
        );

        let enrichment = self.dispatcher.submit(reading.clone());
        Ok(IngestReceipt { reading, enrichment })
    }
}
