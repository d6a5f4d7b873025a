//! In-memory storage backend.
//!
//! Intended for tests and database-less runs. Every write takes one lock, so
//! the enrichment write is atomic by construction and ids and `received_at`
//! stamps are handed out in the same order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{Session, SessionFactory};
use crate::derive::DerivedFeatures;
use crate::error::StorageError;
use crate::models::{
    IntegratedObservation, MlViewRow, NewSensorReading, RecordSet, SensorReading,
    StoredWeatherSnapshot, WeatherSnapshot,
};

#[derive(Debug, Default)]
struct MemoryState {
    readings: Vec<SensorReading>,
    weather: Vec<StoredWeatherSnapshot>,
    integrated: Vec<IntegratedObservation>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MemoryState>,
    fail_enrichment_writes: AtomicBool,
    fail_reading_writes: AtomicBool,
}

/// Process-local store shared by every session it opens.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent enrichment write fail (fault injection).
    pub fn fail_enrichment_writes(&self, fail: bool) {
        self.shared.fail_enrichment_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent raw-reading write fail (fault injection).
    pub fn fail_reading_writes(&self, fail: bool) {
        self.shared.fail_reading_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of rows in a record set, without going through the pool.
    pub fn len(&self, set: RecordSet) -> usize {
        match self.shared.state.lock() {
            Ok(state) => match set {
                RecordSet::Readings => state.readings.len(),
                RecordSet::Weather => state.weather.len(),
                RecordSet::Integrated => state.integrated.len(),
            },
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl SessionFactory for MemoryStore {
    type Session = MemorySession;

    async fn connect(&self) -> Result<MemorySession, StorageError> {
        Ok(MemorySession {
            shared: self.shared.clone(),
        })
    }
}

/// Session over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
}

impl MemorySession {
    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.shared
            .state
            .lock()
            .map_err(|_| StorageError::backend("memory store lock poisoned"))
    }
}

fn newest_first<T: Clone>(rows: &[T], limit: Option<u32>, key: impl Fn(&T) -> (i64, i64)) -> Vec<T> {
    let mut out = rows.to_vec();
    out.sort_by_key(|row| std::cmp::Reverse(key(row)));
    if let Some(limit) = limit {
        out.truncate(limit as usize);
    }
    out
}

#[async_trait]
impl Session for MemorySession {
    async fn insert_reading(&mut self, reading: &NewSensorReading) -> Result<SensorReading, StorageError> {
        if self.shared.fail_reading_writes.load(Ordering::SeqCst) {
            return Err(StorageError::backend("injected reading write failure"));
        }
        let mut state = self.state()?;
        let now = Utc::now();
        let received_at = match state.readings.last() {
            Some(last) => last.received_at.max(now),
            None => now,
        };
        let stored = SensorReading::from_new(state.readings.len() as i64 + 1, received_at, reading);
        state.readings.push(stored.clone());
        Ok(stored)
    }

    async fn insert_enrichment(
        &mut self,
        snapshot: &WeatherSnapshot,
        reading: &SensorReading,
        derived: DerivedFeatures,
    ) -> Result<(StoredWeatherSnapshot, IntegratedObservation), StorageError> {
        if self.shared.fail_enrichment_writes.load(Ordering::SeqCst) {
            return Err(StorageError::backend("injected enrichment write failure"));
        }
        let mut state = self.state()?;
        if !state.readings.iter().any(|r| r.id == reading.id) {
            return Err(StorageError::backend(format!(
                "reading {} does not exist",
                reading.id
            )));
        }

        if state.integrated.iter().any(|o| o.reading_id == reading.id) {
            return Err(StorageError::backend(format!(
                "reading {} is already integrated",
                reading.id
            )));
        }

        let weather = StoredWeatherSnapshot {
            id: state.weather.len() as i64 + 1,
            snapshot: snapshot.clone(),
        };
        let observation = IntegratedObservation::assemble(
            state.integrated.len() as i64 + 1,
            reading,
            weather.id,
            snapshot,
            derived,
        );
        state.weather.push(weather.clone());
        state.integrated.push(observation.clone());
        Ok((weather, observation))
    }

    async fn list_readings(&mut self, limit: Option<u32>) -> Result<Vec<SensorReading>, StorageError> {
        let state = self.state()?;
        Ok(newest_first(&state.readings, limit, |r| {
            (r.received_at.timestamp_micros(), r.id)
        }))
    }

    async fn list_weather(&mut self, limit: Option<u32>) -> Result<Vec<StoredWeatherSnapshot>, StorageError> {
        let state = self.state()?;
        Ok(newest_first(&state.weather, limit, |w| {
            (w.snapshot.collected_at.timestamp_micros(), w.id)
        }))
    }

    async fn list_integrated(&mut self, limit: Option<u32>) -> Result<Vec<IntegratedObservation>, StorageError> {
        let state = self.state()?;
        Ok(newest_first(&state.integrated, limit, |o| {
            (o.observed_at.timestamp_micros(), o.id)
        }))
    }

    async fn count(&mut self, set: RecordSet) -> Result<u64, StorageError> {
        let state = self.state()?;
        let n = match set {
            RecordSet::Readings => state.readings.len(),
            RecordSet::Weather => state.weather.len(),
            RecordSet::Integrated => state.integrated.len(),
        };
        Ok(n as u64)
    }

    async fn ml_view(&mut self, limit: u32) -> Result<Vec<MlViewRow>, StorageError> {
        let state = self.state()?;
        Ok(newest_first(&state.integrated, Some(limit), |o| {
            (o.observed_at.timestamp_micros(), o.id)
        })
        .iter()
        .map(MlViewRow::from_observation)
        .collect())
    }
}
