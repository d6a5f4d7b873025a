//! Postgres-backed sessions over a `sqlx` connection pool.
//!
//! [`PgStore`] owns the `PgPool`; each [`PgSession`] is one checked-out
//! pool connection, returned to the pool when dropped. The enrichment write
//! runs in a single transaction: the weather row is inserted first and its
//! id is bound into the integrated row, so either both rows commit or
//! neither does.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Connection, PgConnection, Postgres};

use super::{Session, SessionPool};
use crate::derive::DerivedFeatures;
use crate::error::StorageError;
use crate::models::{
    IntegratedObservation, MlViewRow, NewSensorReading, RecordSet, SensorReading,
    StoredWeatherSnapshot, WeatherSnapshot,
};
use crate::pool::{PoolOptions, PoolStatus};

// ---

/// Serializes raw-reading inserts so ids and `received_at` agree.
const READING_INSERT_LOCK: i64 = 0x6669_656c_6472_6431;

/// Postgres storage backed by a bounded `PgPool`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open the pool with `options.min` warm connections.
    pub async fn connect(db_url: &str, options: PoolOptions) -> Result<Self, StorageError> {
        // ---
        let pool = PgPoolOptions::new()
            .min_connections(options.min)
            .max_connections(options.max.max(1))
            .acquire_timeout(options.acquire_timeout)
            .connect(db_url)
            .await?;
        tracing::debug!("Postgres pool ready with {} connections", pool.size());
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Reject further checkouts and close idle connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn acquire_timeout(&self) -> Duration {
        self.pool.options().get_acquire_timeout()
    }
}

/// Map `sqlx` checkout failures onto the pool error variants.
fn checkout_error(err: sqlx::Error, waited: Duration) -> StorageError {
    match err {
        sqlx::Error::PoolTimedOut => {
            tracing::warn!("Postgres pool exhausted, waited {:?}", waited);
            StorageError::PoolExhausted { waited }
        }
        sqlx::Error::PoolClosed => StorageError::PoolClosed,
        other => StorageError::Database(other),
    }
}

#[async_trait]
impl SessionPool for PgStore {
    type Session = PgSession;

    async fn acquire(&self) -> Result<PgSession, StorageError> {
        // ---
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| checkout_error(e, self.acquire_timeout()))?;
        Ok(PgSession { conn })
    }

    fn status(&self) -> PoolStatus {
        // ---
        let size = self.pool.size() as usize;
        let idle = self.pool.num_idle();
        PoolStatus {
            idle,
            in_use: size.saturating_sub(idle),
            max: self.pool.options().get_max_connections(),
        }
    }
}

/// One checked-out Postgres connection.
#[derive(Debug)]
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

impl PgSession {
    /// Borrow the underlying connection.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

const READING_COLUMNS: &str = "id, observed_at, received_at, soil_moisture, soil_temperature, \
     soil_ph, phosphorus_present, potassium_present, pump_on";

const WEATHER_COLUMNS: &str = "id, collected_at, ambient_temperature, ambient_humidity, pressure, \
     wind_speed, wind_direction, condition, rain_probability, rain_amount, uv_index, visibility, \
     source_label";

#[async_trait]
impl Session for PgSession {
    async fn insert_reading(&mut self, reading: &NewSensorReading) -> Result<SensorReading, StorageError> {
        // ---
        Ok(insert_reading_tx(&mut self.conn, reading).await?)
    }

    async fn insert_enrichment(
        &mut self,
        snapshot: &WeatherSnapshot,
        reading: &SensorReading,
        derived: DerivedFeatures,
    ) -> Result<(StoredWeatherSnapshot, IntegratedObservation), StorageError> {
        // ---
        Ok(insert_enrichment_tx(&mut self.conn, snapshot, reading, derived).await?)
    }

    async fn list_readings(&mut self, limit: Option<u32>) -> Result<Vec<SensorReading>, StorageError> {
        // ---
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM sensor_readings \
             ORDER BY received_at DESC, id DESC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, SensorReading>(&sql)
            .bind(limit.map(i64::from))
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows)
    }

    async fn list_weather(&mut self, limit: Option<u32>) -> Result<Vec<StoredWeatherSnapshot>, StorageError> {
        // ---
        let sql = format!(
            "SELECT {WEATHER_COLUMNS} FROM weather_snapshots \
             ORDER BY collected_at DESC, id DESC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, StoredWeatherSnapshot>(&sql)
            .bind(limit.map(i64::from))
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows)
    }

    async fn list_integrated(&mut self, limit: Option<u32>) -> Result<Vec<IntegratedObservation>, StorageError> {
        // ---
        let rows = sqlx::query_as::<_, IntegratedObservation>(
            "SELECT * FROM integrated_observations ORDER BY observed_at DESC, id DESC LIMIT $1",
        )
        .bind(limit.map(i64::from))
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }

    async fn count(&mut self, set: RecordSet) -> Result<u64, StorageError> {
        // ---
        let table = match set {
            RecordSet::Readings => "sensor_readings",
            RecordSet::Weather => "weather_snapshots",
            RecordSet::Integrated => "integrated_observations",
        };
        let n = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn ml_view(&mut self, limit: u32) -> Result<Vec<MlViewRow>, StorageError> {
        // ---
        let rows = sqlx::query_as::<_, MlViewRow>(
            "SELECT * FROM integrated_ml_view ORDER BY observed_at DESC, id DESC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }
}

async fn insert_reading_tx(conn: &mut PgConnection, reading: &NewSensorReading) -> Result<SensorReading, sqlx::Error> {
    // ---
    let mut tx = conn.begin().await?;

    // Held until commit, so the id sequence and the stamp advance together.
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(READING_INSERT_LOCK)
        .execute(&mut *tx)
        .await?;

    let sql = format!(
        r#"
        INSERT INTO sensor_readings (
            observed_at, received_at, soil_moisture, soil_temperature,
            soil_ph, phosphorus_present, potassium_present, pump_on
        ) VALUES (
            $1,
            (SELECT GREATEST(clock_timestamp(), COALESCE(MAX(received_at), '-infinity'::timestamptz))
               FROM sensor_readings),
            $2, $3, $4, $5, $6, $7
        )
        RETURNING {READING_COLUMNS}
        "#
    );
    let stored = sqlx::query_as::<_, SensorReading>(&sql)
        .bind(reading.observed_at)
        .bind(reading.soil_moisture)
        .bind(reading.soil_temperature)
        .bind(reading.soil_ph)
        .bind(reading.phosphorus_present)
        .bind(reading.potassium_present)
        .bind(reading.pump_on)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(stored)
}

async fn insert_enrichment_tx(
    conn: &mut PgConnection,
    snapshot: &WeatherSnapshot,
    reading: &SensorReading,
    derived: DerivedFeatures,
) -> Result<(StoredWeatherSnapshot, IntegratedObservation), sqlx::Error> {
    // ---
    let mut tx = conn.begin().await?;

    let weather_sql = format!(
        r#"
        INSERT INTO weather_snapshots (
            collected_at, ambient_temperature, ambient_humidity, pressure,
            wind_speed, wind_direction, condition, rain_probability,
            rain_amount, uv_index, visibility, source_label
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {WEATHER_COLUMNS}
        "#
    );
    let weather = sqlx::query_as::<_, StoredWeatherSnapshot>(&weather_sql)
        .bind(snapshot.collected_at)
        .bind(snapshot.ambient_temperature)
        .bind(snapshot.ambient_humidity)
        .bind(snapshot.pressure)
        .bind(snapshot.wind_speed)
        .bind(&snapshot.wind_direction)
        .bind(&snapshot.condition)
        .bind(snapshot.rain_probability)
        .bind(snapshot.rain_amount)
        .bind(snapshot.uv_index)
        .bind(snapshot.visibility)
        .bind(&snapshot.source_label)
        .fetch_one(&mut *tx)
        .await?;

    // Build the row locally so the insert binds exactly what the join holds.
    let pending = IntegratedObservation::assemble(0, reading, weather.id, snapshot, derived);
    let observation = sqlx::query_as::<_, IntegratedObservation>(
        r#"
        INSERT INTO integrated_observations (
            reading_id, weather_id,
            observed_at, received_at, soil_moisture, soil_temperature, soil_ph,
            phosphorus_present, potassium_present, pump_on,
            collected_at, ambient_temperature, ambient_humidity, pressure,
            wind_speed, wind_direction, condition, rain_probability, rain_amount,
            uv_index, visibility, source_label,
            temperature_gap, humidity_deficit, evapotranspiration_factor
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
        )
        RETURNING *
        "#,
    )
    .bind(pending.reading_id)
    .bind(pending.weather_id)
    .bind(pending.observed_at)
    .bind(pending.received_at)
    .bind(pending.soil_moisture)
    .bind(pending.soil_temperature)
    .bind(pending.soil_ph)
    .bind(pending.phosphorus_present)
    .bind(pending.potassium_present)
    .bind(pending.pump_on)
    .bind(pending.collected_at)
    .bind(pending.ambient_temperature)
    .bind(pending.ambient_humidity)
    .bind(pending.pressure)
    .bind(pending.wind_speed)
    .bind(&pending.wind_direction)
    .bind(&pending.condition)
    .bind(pending.rain_probability)
    .bind(pending.rain_amount)
    .bind(pending.uv_index)
    .bind(pending.visibility)
    .bind(&pending.source_label)
    .bind(pending.temperature_gap)
    .bind(pending.humidity_deficit)
    .bind(pending.evapotranspiration_factor)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((weather, observation))
}
