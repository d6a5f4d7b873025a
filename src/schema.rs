//! Database schema management for `fieldflow-irrigation`.
//!
//! Ensures the three record sets, their indexes and the ML view exist before
//! serving requests. Applied once on startup from `main.rs`.

use sqlx::PgPool;

use crate::error::StorageError;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `sensor_readings`, `weather_snapshots`, `integrated_observations`
/// and the `integrated_ml_view` computed view. Safe to call on every
/// startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<(), StorageError> {
    // ---
    let mut tx = pool.begin().await?;

    // Raw readings written by the fast path
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id                 BIGSERIAL PRIMARY KEY,
            observed_at        TIMESTAMPTZ      NOT NULL,
            received_at        TIMESTAMPTZ      NOT NULL,
            soil_moisture      DOUBLE PRECISION NOT NULL,
            soil_temperature   DOUBLE PRECISION NOT NULL,
            soil_ph            DOUBLE PRECISION NOT NULL,
            phosphorus_present BOOLEAN          NOT NULL,
            potassium_present  BOOLEAN          NOT NULL,
            pump_on            BOOLEAN          NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // One snapshot per enrichment cycle
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weather_snapshots (
            id                  BIGSERIAL PRIMARY KEY,
            collected_at        TIMESTAMPTZ      NOT NULL,
            ambient_temperature DOUBLE PRECISION NOT NULL,
            ambient_humidity    DOUBLE PRECISION NOT NULL,
            pressure            DOUBLE PRECISION NOT NULL,
            wind_speed          DOUBLE PRECISION NOT NULL,
            wind_direction      TEXT             NOT NULL,
            condition           TEXT             NOT NULL,
            rain_probability    DOUBLE PRECISION NOT NULL,
            rain_amount         DOUBLE PRECISION NOT NULL CHECK (rain_amount >= 0),
            uv_index            DOUBLE PRECISION,
            visibility          DOUBLE PRECISION,
            source_label        TEXT             NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Join of one reading and the snapshot of the same cycle
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS integrated_observations (
            id                        BIGSERIAL PRIMARY KEY,
            reading_id                BIGINT NOT NULL UNIQUE REFERENCES sensor_readings (id),
            weather_id                BIGINT NOT NULL UNIQUE REFERENCES weather_snapshots (id),
            observed_at               TIMESTAMPTZ      NOT NULL,
            received_at               TIMESTAMPTZ      NOT NULL,
            soil_moisture             DOUBLE PRECISION NOT NULL,
            soil_temperature          DOUBLE PRECISION NOT NULL,
            soil_ph                   DOUBLE PRECISION NOT NULL,
            phosphorus_present        BOOLEAN          NOT NULL,
            potassium_present         BOOLEAN          NOT NULL,
            pump_on                   BOOLEAN          NOT NULL,
            collected_at              TIMESTAMPTZ      NOT NULL,
            ambient_temperature       DOUBLE PRECISION NOT NULL,
            ambient_humidity          DOUBLE PRECISION NOT NULL,
            pressure                  DOUBLE PRECISION NOT NULL,
            wind_speed                DOUBLE PRECISION NOT NULL,
            wind_direction            TEXT             NOT NULL,
            condition                 TEXT             NOT NULL,
            rain_probability          DOUBLE PRECISION NOT NULL,
            rain_amount               DOUBLE PRECISION NOT NULL,
            uv_index                  DOUBLE PRECISION,
            visibility                DOUBLE PRECISION,
            source_label              TEXT             NOT NULL,
            temperature_gap           DOUBLE PRECISION NOT NULL,
            humidity_deficit          DOUBLE PRECISION NOT NULL,
            evapotranspiration_factor DOUBLE PRECISION NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Calendar and threshold features for the feature extractor
    sqlx::query(
        r#"
        CREATE OR REPLACE VIEW integrated_ml_view AS
        SELECT
            id,
            observed_at,
            soil_moisture,
            soil_temperature,
            soil_ph,
            phosphorus_present,
            potassium_present,
            pump_on,
            ambient_temperature,
            ambient_humidity,
            pressure,
            wind_speed,
            rain_probability,
            rain_amount,
            uv_index,
            visibility,
            temperature_gap,
            humidity_deficit,
            evapotranspiration_factor,
            EXTRACT(HOUR  FROM observed_at AT TIME ZONE 'UTC')::INT AS hour_of_day,
            EXTRACT(DOW   FROM observed_at AT TIME ZONE 'UTC')::INT AS day_of_week,
            EXTRACT(MONTH FROM observed_at AT TIME ZONE 'UTC')::INT AS month,
            (rain_probability > 70)    AS will_rain_today,
            (wind_speed > 15)          AS high_wind,
            (ambient_temperature > 30) AS hot_day
        FROM integrated_observations;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Newest-first reads
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_received_at
            ON sensor_readings (received_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_weather_snapshots_collected_at
            ON weather_snapshots (collected_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_integrated_observations_observed_at
            ON integrated_observations (observed_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
