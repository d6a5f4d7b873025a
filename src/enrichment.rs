//! Background enrichment of stored readings.
//!
//! Each accepted reading gets one cycle:
//!
//! ```text
//! PENDING → COLLECTING_WEATHER → COMPUTING_DERIVED → PERSISTING → DONE
//!     └──────────────┴───────────────────┴───────────────┴──→ FAILED
//! ```
//!
//! Cycles run on their own tokio task, submitted through
//! [`EnrichmentDispatcher`]. A failed cycle is logged and ends there: the raw
//! reading is already committed, nothing is retried, and the next reading
//! simply starts a fresh cycle.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::derive::derive;
use crate::error::{EnrichmentFailure, StorageError};
use crate::models::SensorReading;
use crate::store::{Session, SessionPool};
use crate::weather::{Provenance, WeatherCollector};

/// States of one enrichment cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    Pending,
    CollectingWeather,
    ComputingDerived,
    Persisting,
    Done,
    Failed,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Done | CycleState::Failed)
    }

    /// Legal forward transition (FAILED is reachable from any non-terminal
    /// state).
    fn can_advance_to(self, next: CycleState) -> bool {
        use CycleState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Pending, CollectingWeather)
            | (CollectingWeather, ComputingDerived)
            | (ComputingDerived, Persisting)
            | (Persisting, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Pending => "PENDING",
            CycleState::CollectingWeather => "COLLECTING_WEATHER",
            CycleState::ComputingDerived => "COMPUTING_DERIVED",
            CycleState::Persisting => "PERSISTING",
            CycleState::Done => "DONE",
            CycleState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// What happened in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub reading_id: i64,
    pub state: CycleState,
    /// Every state visited, starting with `Pending`.
    pub trail: Vec<CycleState>,
    pub provenance: Option<Provenance>,
    pub weather_id: Option<i64>,
    pub integrated_id: Option<i64>,
    pub failure: Option<String>,
}

impl CycleReport {
    fn new(reading_id: i64) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            reading_id,
            state: CycleState::Pending,
            trail: vec![CycleState::Pending],
            provenance: None,
            weather_id: None,
            integrated_id: None,
            failure: None,
        }
    }

    fn advance(&mut self, next: CycleState) {
        // ---
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(cycle_id = %self.cycle_id, "{} -> {}", self.state, next);
        self.state = next;
        self.trail.push(next);
    }

    fn failure(&self, source: StorageError) -> EnrichmentFailure {
        EnrichmentFailure {
            cycle_id: self.cycle_id,
            reading_id: self.reading_id,
            state: self.state,
            source,
        }
    }

    /// Report for a cycle whose task died before it could report itself.
    fn aborted(reading_id: i64, reason: String) -> Self {
        let mut report = Self::new(reading_id);
        report.failure = Some(reason);
        report.advance(CycleState::Failed);
        report
    }

    pub fn succeeded(&self) -> bool {
        self.state == CycleState::Done
    }
}

/// Runs enrichment cycles against the shared pool.
pub struct EnrichmentWorker<P: SessionPool> {
    pool: P,
    weather: WeatherCollector,
}

impl<P: SessionPool> EnrichmentWorker<P> {
    pub fn new(pool: P, weather: WeatherCollector) -> Self {
        Self { pool, weather }
    }

    /// Run one cycle to DONE or FAILED. Never returns an error.
    pub async fn run(&self, reading: SensorReading) -> CycleReport {
        // ---
        let mut report = CycleReport::new(reading.id);

        match self.execute(&mut report, &reading).await {
            Ok(()) => {
                tracing::info!(
                    cycle_id = %report.cycle_id,
                    "Enriched reading {} (weather {:?}, integrated {:?})",
                    reading.id,
                    report.weather_id,
                    report.integrated_id
                );
            }
            Err(failure) => {
                tracing::error!("{}", failure);
                report.failure = Some(failure.to_string());
                report.advance(CycleState::Failed);
            }
        }
        report
    }

    async fn execute(&self, report: &mut CycleReport, reading: &SensorReading) -> Result<(), EnrichmentFailure> {
        // ---
        report.advance(CycleState::CollectingWeather);
        let collected = self.weather.collect(Utc::now()).await;
        report.provenance = Some(collected.provenance());
        let snapshot = collected.into_snapshot();

        report.advance(CycleState::ComputingDerived);
        let derived = derive(reading, &snapshot);

        report.advance(CycleState::Persisting);
        let mut session = self.pool.acquire().await.map_err(|e| report.failure(e))?;
        let (weather, observation) = session
            .insert_enrichment(&snapshot, reading, derived)
            .await
            .map_err(|e| report.failure(e))?;
        drop(session);

        report.weather_id = Some(weather.id);
        report.integrated_id = Some(observation.id);
        report.advance(CycleState::Done);
        Ok(())
    }
}

/// Task-submission front of the enrichment worker.
///
/// One tokio task per submitted reading. With a concurrency limit, tasks
/// wait inside themselves for a slot, so `submit` never blocks the caller.
pub struct EnrichmentDispatcher<P: SessionPool> {
    worker: Arc<EnrichmentWorker<P>>,
    limit: Option<Arc<Semaphore>>,
}

impl<P: SessionPool> Clone for EnrichmentDispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            worker: self.worker.clone(),
            limit: self.limit.clone(),
        }
    }
}

impl<P: SessionPool> EnrichmentDispatcher<P> {
    /// `max_concurrent = 0` means unbounded.
    pub fn new(worker: EnrichmentWorker<P>, max_concurrent: usize) -> Self {
        Self {
            worker: Arc::new(worker),
            limit: (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent))),
        }
    }

    /// Schedule a cycle for `reading`. Fire-and-forget; the handle may be
    /// dropped.
    ///
    /// The cycle runs on its own task, watched by a second one. A cycle task
    /// that panics is logged and reported as FAILED instead of vanishing
    /// with the dropped handle.
    pub fn submit(&self, reading: SensorReading) -> JoinHandle<CycleReport> {
        // ---
        let reading_id = reading.id;
        let worker = self.worker.clone();
        let limit = self.limit.clone();
        let cycle = tokio::spawn(async move {
            let _slot = match limit {
                Some(limit) => limit.acquire_owned().await.ok(),
                None => None,
            };
            worker.run(reading).await
        });

        tokio::spawn(async move {
            match cycle.await {
                Ok(report) => report,
                Err(e) => {
                    let report = CycleReport::aborted(reading_id, format!("enrichment task aborted: {e}"));
                    tracing::error!(
                        cycle_id = %report.cycle_id,
                        "Enrichment cycle for reading {} aborted: {}",
                        reading_id,
                        e
                    );
                    report
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::error::WeatherSourceError;
    use crate::models::{NewSensorReading, RecordSet, WeatherSnapshot};
    use crate::pool::{ConnectionPool, PoolOptions};
    use crate::store::MemoryStore;
    use crate::weather::WeatherSource;
    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset};
    use std::time::Duration;

    async fn setup() -> (MemoryStore, ConnectionPool<MemoryStore>, SensorReading) {
        // ---
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(store.clone(), PoolOptions::default());
        let now = Utc::now();
        let reading = pool
            .acquire()
            .await
            .unwrap()
            .insert_reading(&NewSensorReading {
                observed_at: now,
                soil_moisture: 65.5,
                soil_temperature: 24.2,
                soil_ph: 6.8,
                phosphorus_present: true,
                potassium_present: false,
                pump_on: false,
            })
            .await
            .unwrap();
        (store, pool, reading)
    }

    fn worker(pool: &ConnectionPool<MemoryStore>) -> EnrichmentWorker<ConnectionPool<MemoryStore>> {
        EnrichmentWorker::new(pool.clone(), WeatherCollector::synthetic(FixedOffset::east_opt(0).unwrap()))
    }

    #[tokio::test]
    async fn test_cycle_reaches_done_through_every_state() {
        // ---
        let (store, pool, reading) = setup().await;
        let report = worker(&pool).run(reading).await;

        assert!(report.succeeded());
        assert_eq!(
            report.trail,
            vec![
                CycleState::Pending,
                CycleState::CollectingWeather,
                CycleState::ComputingDerived,
                CycleState::Persisting,
                CycleState::Done,
            ]
        );
        assert_eq!(report.provenance, Some(Provenance::Synthetic));
        assert_eq!(store.len(RecordSet::Weather), 1);
        assert_eq!(store.len(RecordSet::Integrated), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_ends_in_failed_and_keeps_reading() {
        // ---
        let (store, pool, reading) = setup().await;
        store.fail_enrichment_writes(true);

        let report = worker(&pool).run(reading).await;

        assert_eq!(report.state, CycleState::Failed);
        assert_eq!(report.trail[report.trail.len() - 2], CycleState::Persisting);
        assert!(report.failure.as_deref().unwrap_or_default().contains("PERSISTING"));
        assert_eq!(store.len(RecordSet::Readings), 1);
        assert_eq!(store.len(RecordSet::Weather), 0);
        assert_eq!(store.len(RecordSet::Integrated), 0);
        // The slot was released on the failure path.
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_fails_cycle() {
        // ---
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(
            store.clone(),
            PoolOptions {
                min: 0,
                max: 1,
                acquire_timeout: Duration::from_millis(20),
            },
        );
        let reading = {
            let mut session = pool.acquire().await.unwrap();
            let now = Utc::now();
            session
                .insert_reading(&NewSensorReading {
                    observed_at: now,
                    soil_moisture: 30.0,
                    soil_temperature: 20.0,
                    soil_ph: 6.0,
                    phosphorus_present: false,
                    potassium_present: false,
                    pump_on: true,
                })
                .await
                .unwrap()
        };

        let _held = pool.acquire().await.unwrap();
        let report = worker(&pool).run(reading).await;
        assert_eq!(report.state, CycleState::Failed);
        assert!(report.failure.unwrap().contains("exhausted"));
    }

    #[tokio::test]
    async fn test_dispatcher_limit_still_completes_all() {
        // ---
        let (store, pool, first) = setup().await;
        let dispatcher = EnrichmentDispatcher::new(worker(&pool), 1);

        let mut readings = vec![first.clone()];
        for _ in 0..3 {
            let mut session = pool.acquire().await.unwrap();
            let mut next = NewSensorReading {
                observed_at: first.observed_at,
                soil_moisture: first.soil_moisture,
                soil_temperature: first.soil_temperature,
                soil_ph: first.soil_ph,
                phosphorus_present: first.phosphorus_present,
                potassium_present: first.potassium_present,
                pump_on: first.pump_on,
            };
            next.pump_on = !next.pump_on;
            readings.push(session.insert_reading(&next).await.unwrap());
        }

        let handles: Vec<_> = readings.into_iter().map(|r| dispatcher.submit(r)).collect();
        for handle in handles {
            assert!(handle.await.unwrap().succeeded());
        }
        assert_eq!(store.len(RecordSet::Integrated), 4);
    }

    /// Live source that blows up inside the cycle task.
    struct PanickingSource;

    #[async_trait]
    impl WeatherSource for PanickingSource {
        fn label(&self) -> &str {
            "panicking-test"
        }

        async fn fetch(&self, _now: DateTime<Utc>) -> Result<WeatherSnapshot, WeatherSourceError> {
            panic!("weather client bug")
        }
    }

    #[tokio::test]
    async fn test_panicking_cycle_is_reported_failed() {
        // ---
        let (store, pool, reading) = setup().await;
        let weather = WeatherCollector::with_live(
            Arc::new(PanickingSource),
            Duration::from_secs(1),
            FixedOffset::east_opt(0).unwrap(),
        );
        let dispatcher = EnrichmentDispatcher::new(EnrichmentWorker::new(pool.clone(), weather), 0);

        let report = dispatcher.submit(reading.clone()).await.unwrap();
        assert_eq!(report.state, CycleState::Failed);
        assert_eq!(report.reading_id, reading.id);
        assert!(report.failure.unwrap().contains("aborted"));
        assert_eq!(store.len(RecordSet::Integrated), 0);
    }

    #[tokio::test]
    async fn test_second_cycle_for_same_reading_fails() {
        // ---
        let (store, pool, reading) = setup().await;
        assert!(worker(&pool).run(reading.clone()).await.succeeded());

        let again = worker(&pool).run(reading).await;
        assert_eq!(again.state, CycleState::Failed);
        assert_eq!(store.len(RecordSet::Integrated), 1);
    }

    #[test]
    fn test_transition_table() {
        // ---
        use CycleState::*;
        assert!(Pending.can_advance_to(CollectingWeather));
        assert!(Persisting.can_advance_to(Done));
        assert!(CollectingWeather.can_advance_to(Failed));
        assert!(!Pending.can_advance_to(Done));
        assert!(!Done.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Pending));
        assert!(Done.is_terminal() && Failed.is_terminal());
    }
}
