//! Bounded pool of reusable sessions for backends that do not pool on
//! their own (the in-memory store). Postgres uses the `sqlx` pool directly,
//! see [`PgStore`](crate::store::PgStore).
//!
//! `max` is a hard cap on sessions in use at once, enforced by a semaphore.
//! Checkout waits at most `acquire_timeout` for a permit and then fails with
//! [`StorageError::PoolExhausted`]. A checked-out session is wrapped in a
//! [`PooledSession`] guard that returns it on drop, so release happens on
//! every exit path including `?` and panics. No retries at this layer.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::derive::DerivedFeatures;
use crate::error::StorageError;
use crate::models::{
    IntegratedObservation, MlViewRow, NewSensorReading, RecordSet, SensorReading,
    StoredWeatherSnapshot, WeatherSnapshot,
};
use crate::store::{Session, SessionFactory, SessionPool};

/// Pool sizing and checkout timeout.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Sessions opened by [`ConnectionPool::warm`] and kept idle.
    pub min: u32,
    /// Hard cap on concurrently checked-out sessions.
    pub max: u32,
    /// Longest a checkout may wait for a free slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min: 1,
            max: 5,
            acquire_timeout: Duration::from_secs(2),
        }
    }
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub max: u32,
}

struct PoolInner<F: SessionFactory> {
    factory: F,
    idle: Mutex<Vec<F::Session>>,
    permits: Arc<Semaphore>,
    options: PoolOptions,
}

/// Owned, cloneable handle to a bounded session pool.
pub struct ConnectionPool<F: SessionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: SessionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: SessionFactory> ConnectionPool<F> {
    /// Create an empty pool. Call [`warm`](Self::warm) to open `min` sessions.
    pub fn new(factory: F, options: PoolOptions) -> Self {
        // ---
        let max = options.max.max(1);
        Self {
            inner: Arc::new(PoolInner {
                factory,
                idle: Mutex::new(Vec::with_capacity(max as usize)),
                permits: Arc::new(Semaphore::new(max as usize)),
                options: PoolOptions { max, ..options },
            }),
        }
    }

    /// Open sessions until `min` are idle.
    pub async fn warm(&self) -> Result<(), StorageError> {
        // ---
        let target = self.inner.options.min.min(self.inner.options.max) as usize;
        while self.idle_len() < target {
            let session = self.inner.factory.connect().await?;
            self.push_idle(session);
        }
        tracing::debug!("Connection pool warmed with {} idle sessions", self.idle_len());
        Ok(())
    }

    /// Check out a session, waiting at most `acquire_timeout` for a slot.
    pub async fn acquire(&self) -> Result<PooledSession<F>, StorageError> {
        // ---
        let waited = self.inner.options.acquire_timeout;
        let permit = match tokio::time::timeout(waited, self.inner.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StorageError::PoolClosed),
            Err(_) => {
                tracing::warn!(
                    "Connection pool exhausted: {} sessions in use, waited {:?}",
                    self.inner.options.max,
                    waited
                );
                return Err(StorageError::PoolExhausted { waited });
            }
        };

        let session = match self.pop_idle() {
            Some(session) => session,
            // The permit is dropped with the error, freeing the slot.
            None => self.inner.factory.connect().await?,
        };

        Ok(PooledSession {
            session: Some(session),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Return a session explicitly. Equivalent to dropping the guard.
    pub fn release(&self, session: PooledSession<F>) {
        drop(session);
    }

    /// Reject all further checkouts. Sessions already out finish normally.
    pub fn close(&self) {
        self.inner.permits.close();
        if let Ok(mut idle) = self.inner.idle.lock() {
            idle.clear();
        }
    }

    pub fn status(&self) -> PoolStatus {
        // ---
        let max = self.inner.options.max;
        PoolStatus {
            idle: self.idle_len(),
            in_use: max as usize - self.inner.permits.available_permits().min(max as usize),
            max,
        }
    }

    pub fn options(&self) -> PoolOptions {
        self.inner.options
    }

    fn idle_len(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn pop_idle(&self) -> Option<F::Session> {
        self.inner.idle.lock().ok().and_then(|mut idle| idle.pop())
    }

    fn push_idle(&self, session: F::Session) {
        if let Ok(mut idle) = self.inner.idle.lock() {
            idle.push(session);
        }
    }
}

/// Exclusive checkout of one session. Returned to the pool on drop.
pub struct PooledSession<F: SessionFactory> {
    session: Option<F::Session>,
    pool: Arc<PoolInner<F>>,
    // Dropped after `Drop::drop` runs, so the session is back in the idle
    // set before its slot is freed.
    _permit: OwnedSemaphorePermit,
}

impl<F: SessionFactory> Deref for PooledSession<F> {
    type Target = F::Session;

    fn deref(&self) -> &F::Session {
        // `session` is only taken in `drop`.
        self.session.as_ref().unwrap_or_else(|| unreachable!("pooled session used after release"))
    }
}

impl<F: SessionFactory> DerefMut for PooledSession<F> {
    fn deref_mut(&mut self) -> &mut F::Session {
        self.session.as_mut().unwrap_or_else(|| unreachable!("pooled session used after release"))
    }
}

impl<F: SessionFactory> Drop for PooledSession<F> {
    fn drop(&mut self) {
        // ---
        let Some(session) = self.session.take() else {
            return;
        };
        if self.pool.permits.is_closed() {
            tracing::debug!("Pool closed, discarding returned session");
            return;
        }
        if let Ok(mut idle) = self.pool.idle.lock() {
            idle.push(session);
        }
    }
}

#[async_trait]
impl<F: SessionFactory> SessionPool for ConnectionPool<F> {
    type Session = PooledSession<F>;

    async fn acquire(&self) -> Result<PooledSession<F>, StorageError> {
        ConnectionPool::acquire(self).await
    }

    fn status(&self) -> PoolStatus {
        ConnectionPool::status(self)
    }
}

#[async_trait]
impl<F: SessionFactory> Session for PooledSession<F> {
    async fn insert_reading(&mut self, reading: &NewSensorReading) -> Result<SensorReading, StorageError> {
        (**self).insert_reading(reading).await
    }

    async fn insert_enrichment(
        &mut self,
        snapshot: &WeatherSnapshot,
        reading: &SensorReading,
        derived: DerivedFeatures,
    ) -> Result<(StoredWeatherSnapshot, IntegratedObservation), StorageError> {
        (**self).insert_enrichment(snapshot, reading, derived).await
    }

    async fn list_readings(&mut self, limit: Option<u32>) -> Result<Vec<SensorReading>, StorageError> {
        (**self).list_readings(limit).await
    }

    async fn list_weather(&mut self, limit: Option<u32>) -> Result<Vec<StoredWeatherSnapshot>, StorageError> {
        (**self).list_weather(limit).await
    }

    async fn list_integrated(&mut self, limit: Option<u32>) -> Result<Vec<IntegratedObservation>, StorageError> {
        (**self).list_integrated(limit).await
    }

    async fn count(&mut self, set: RecordSet) -> Result<u64, StorageError> {
        (**self).count(set).await
    }

    async fn ml_view(&mut self, limit: u32) -> Result<Vec<MlViewRow>, StorageError> {
        (**self).ml_view(limit).await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::RecordSet;
    use crate::store::MemoryStore;

    fn pool(min: u32, max: u32, timeout_ms: u64) -> ConnectionPool<MemoryStore> {
        // ---
        ConnectionPool::new(
            MemoryStore::new(),
            PoolOptions {
                min,
                max,
                acquire_timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[tokio::test]
    async fn test_warm_opens_min_sessions() {
        // ---
        let pool = pool(3, 5, 50);
        pool.warm().await.unwrap();
        assert_eq!(pool.status(), PoolStatus { idle: 3, in_use: 0, max: 5 });
    }

    #[tokio::test]
    async fn test_exhausted_after_bounded_wait() {
        // ---
        let pool = pool(0, 2, 30);
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.status().in_use, 2);

        match pool.acquire().await {
            Err(StorageError::PoolExhausted { waited }) => assert_eq!(waited, Duration::from_millis(30)),
            Err(other) => panic!("expected PoolExhausted, got {other}"),
            Ok(_) => panic!("expected PoolExhausted, got a session"),
        }
    }

    #[tokio::test]
    async fn test_release_on_drop_frees_slot_and_reuses_session() {
        // ---
        let pool = pool(0, 1, 30);
        {
            let mut session = pool.acquire().await.unwrap();
            session.count(RecordSet::Readings).await.unwrap();
        }
        assert_eq!(pool.status(), PoolStatus { idle: 1, in_use: 0, max: 1 });

        let session = pool.acquire().await.unwrap();
        assert_eq!(pool.status(), PoolStatus { idle: 0, in_use: 1, max: 1 });
        pool.release(session);
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn test_release_survives_early_return() {
        // ---
        async fn failing(pool: &ConnectionPool<MemoryStore>) -> Result<(), StorageError> {
            let _session = pool.acquire().await?;
            Err(StorageError::backend("boom"))
        }

        let pool = pool(0, 1, 30);
        assert!(failing(&pool).await.is_err());
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_released_session() {
        // ---
        let pool = pool(0, 1, 1_000);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_checkout() {
        // ---
        let pool = pool(1, 2, 30);
        pool.warm().await.unwrap();
        pool.close();
        assert!(matches!(pool.acquire().await, Err(StorageError::PoolClosed)));
        assert_eq!(pool.status().idle, 0);
    }
}
