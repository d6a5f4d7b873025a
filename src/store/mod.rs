//! Storage interface consumed by the pipeline.
//!
//! The storage engine itself is an external collaborator. The pipeline only
//! talks to a [`Session`] checked out of a [`SessionPool`]. Two backends are
//! provided: Postgres over a `sqlx` `PgPool`, and an in-memory store behind
//! the bounded [`ConnectionPool`](crate::pool::ConnectionPool) for tests and
//! database-less runs.

use async_trait::async_trait;

use crate::derive::DerivedFeatures;
use crate::error::StorageError;
use crate::pool::PoolStatus;
use crate::models::{
    IntegratedObservation, MlViewRow, NewSensorReading, RecordSet, SensorReading,
    StoredWeatherSnapshot, WeatherSnapshot,
};

pub mod memory;
pub mod postgres;

pub use memory::{MemorySession, MemoryStore};
pub use postgres::{PgSession, PgStore};

/// One storage session. Never shared between two tasks at once; the pool
/// hands out exclusive ownership.
#[async_trait]
pub trait Session: Send + 'static {
    /// Persist one raw reading and return it with its assigned id and
    /// `received_at`. Both are assigned in the same critical section, so a
    /// higher id never carries an earlier `received_at`.
    async fn insert_reading(&mut self, reading: &NewSensorReading) -> Result<SensorReading, StorageError>;

    /// Persist a weather snapshot and the integrated observation built from
    /// it, atomically. The snapshot row is written first so the observation
    /// never references a missing snapshot.
    async fn insert_enrichment(
        &mut self,
        snapshot: &WeatherSnapshot,
        reading: &SensorReading,
        derived: DerivedFeatures,
    ) -> Result<(StoredWeatherSnapshot, IntegratedObservation), StorageError>;

    /// Raw readings, newest first.
    async fn list_readings(&mut self, limit: Option<u32>) -> Result<Vec<SensorReading>, StorageError>;

    /// Weather snapshots, newest first.
    async fn list_weather(&mut self, limit: Option<u32>) -> Result<Vec<StoredWeatherSnapshot>, StorageError>;

    /// Integrated observations, newest first.
    async fn list_integrated(&mut self, limit: Option<u32>) -> Result<Vec<IntegratedObservation>, StorageError>;

    /// Number of rows in a record set.
    async fn count(&mut self, set: RecordSet) -> Result<u64, StorageError>;

    /// Most recent rows of the computed ML view, newest first.
    async fn ml_view(&mut self, limit: u32) -> Result<Vec<MlViewRow>, StorageError>;
}

/// Bounded source of sessions shared by the whole pipeline.
///
/// A checked-out session goes back to the pool when it is dropped. Checkout
/// waits at most the configured acquire timeout and then fails with
/// [`StorageError::PoolExhausted`].
#[async_trait]
pub trait SessionPool: Clone + Send + Sync + 'static {
    type Session: Session;

    async fn acquire(&self) -> Result<Self::Session, StorageError>;

    fn status(&self) -> PoolStatus;
}

/// Opens new sessions for [`ConnectionPool`](crate::pool::ConnectionPool).
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session, StorageError>;
}
