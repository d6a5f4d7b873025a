//! Record types for the three logical record sets and the ML view.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::derive::DerivedFeatures;

// ---

/// A normalized reading ready to be persisted by the fast path.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSensorReading {
    // ---
    pub observed_at: DateTime<Utc>,
    pub soil_moisture: f64,
    pub soil_temperature: f64,
    pub soil_ph: f64,
    pub phosphorus_present: bool,
    pub potassium_present: bool,
    pub pump_on: bool,
}

/// One stored device transmission. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SensorReading {
    // ---
    pub id: i64,
    pub observed_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub soil_moisture: f64,
    pub soil_temperature: f64,
    pub soil_ph: f64,
    pub phosphorus_present: bool,
    pub potassium_present: bool,
    pub pump_on: bool,
}

impl SensorReading {
    // ---
    pub fn from_new(id: i64, received_at: DateTime<Utc>, new: &NewSensorReading) -> Self {
        // ---
        SensorReading {
            id,
            observed_at: new.observed_at,
            received_at,
            soil_moisture: new.soil_moisture,
            soil_temperature: new.soil_temperature,
            soil_ph: new.soil_ph,
            phosphorus_present: new.phosphorus_present,
            potassium_present: new.potassium_present,
            pump_on: new.pump_on,
        }
    }

    /// Device/server clock skew in seconds (informational only).
    pub fn clock_skew_seconds(&self) -> i64 {
        (self.received_at - self.observed_at).num_seconds()
    }
}

/// One weather observation, live or synthesized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WeatherSnapshot {
    // ---
    pub collected_at: DateTime<Utc>,
    pub ambient_temperature: f64,
    pub ambient_humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction: String,
    pub condition: String,
    pub rain_probability: f64,
    pub rain_amount: f64,
    pub uv_index: Option<f64>,
    pub visibility: Option<f64>,
    pub source_label: String,
}

/// A persisted weather snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StoredWeatherSnapshot {
    // ---
    pub id: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub snapshot: WeatherSnapshot,
}

/// Join of one reading and the snapshot of the same enrichment cycle.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct IntegratedObservation {
    // ---
    pub id: i64,
    pub reading_id: i64,
    pub weather_id: i64,

    // Soil side, copied from the reading.
    pub observed_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub soil_moisture: f64,
    pub soil_temperature: f64,
    pub soil_ph: f64,
    pub phosphorus_present: bool,
    pub potassium_present: bool,
    pub pump_on: bool,

    // Weather side, copied from the snapshot.
    pub collected_at: DateTime<Utc>,
    pub ambient_temperature: f64,
    pub ambient_humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction: String,
    pub condition: String,
    pub rain_probability: f64,
    pub rain_amount: f64,
    pub uv_index: Option<f64>,
    pub visibility: Option<f64>,
    pub source_label: String,

    pub temperature_gap: f64,
    pub humidity_deficit: f64,
    pub evapotranspiration_factor: f64,
}

impl IntegratedObservation {
    // ---
    /// Assemble the joined row. `derived` must come from `derive::derive`
    /// over the same reading and snapshot.
    pub fn assemble(
        id: i64,
        reading: &SensorReading,
        weather_id: i64,
        snapshot: &WeatherSnapshot,
        derived: DerivedFeatures,
    ) -> Self {
        // ---
        IntegratedObservation {
            id,
            reading_id: reading.id,
            weather_id,
            observed_at: reading.observed_at,
            received_at: reading.received_at,
            soil_moisture: reading.soil_moisture,
            soil_temperature: reading.soil_temperature,
            soil_ph: reading.soil_ph,
            phosphorus_present: reading.phosphorus_present,
            potassium_present: reading.potassium_present,
            pump_on: reading.pump_on,
            collected_at: snapshot.collected_at,
            ambient_temperature: snapshot.ambient_temperature,
            ambient_humidity: snapshot.ambient_humidity,
            pressure: snapshot.pressure,
            wind_speed: snapshot.wind_speed,
            wind_direction: snapshot.wind_direction.clone(),
            condition: snapshot.condition.clone(),
            rain_probability: snapshot.rain_probability,
            rain_amount: snapshot.rain_amount,
            uv_index: snapshot.uv_index,
            visibility: snapshot.visibility,
            source_label: snapshot.source_label.clone(),
            temperature_gap: derived.temperature_gap,
            humidity_deficit: derived.humidity_deficit,
            evapotranspiration_factor: derived.evapotranspiration_factor,
        }
    }
}

/// Row of the `integrated_ml_view`: an integrated observation projected with
/// calendar features and the boolean weather thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct MlViewRow {
    // ---
    pub id: i64,
    pub observed_at: DateTime<Utc>,
    pub soil_moisture: f64,
    pub soil_temperature: f64,
    pub soil_ph: f64,
    pub phosphorus_present: bool,
    pub potassium_present: bool,
    pub pump_on: bool,
    pub ambient_temperature: f64,
    pub ambient_humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub rain_probability: f64,
    pub rain_amount: f64,
    pub uv_index: Option<f64>,
    pub visibility: Option<f64>,
    pub temperature_gap: f64,
    pub humidity_deficit: f64,
    pub evapotranspiration_factor: f64,
    pub hour_of_day: i32,
    pub day_of_week: i32,
    pub month: i32,
    pub will_rain_today: bool,
    pub high_wind: bool,
    pub hot_day: bool,
}

/// Rain-probability threshold (percent) for `will_rain_today`.
pub const WILL_RAIN_PROBABILITY: f64 = 70.0;
/// Wind-speed threshold for `high_wind`.
pub const HIGH_WIND_SPEED: f64 = 15.0;
/// Ambient-temperature threshold (°C) for `hot_day`.
pub const HOT_DAY_TEMPERATURE: f64 = 30.0;

/// Calendar features of a timestamp, in UTC: hour, day of week (0 = Sunday),
/// month (1-12). Matches `EXTRACT(HOUR|DOW|MONTH)` in the Postgres view.
pub fn calendar_features(at: DateTime<Utc>) -> (i32, i32, i32) {
    // ---
    (
        at.hour() as i32,
        at.weekday().num_days_from_sunday() as i32,
        at.month() as i32,
    )
}

impl MlViewRow {
    // ---
    /// Project an integrated observation the way `integrated_ml_view` does.
    pub fn from_observation(obs: &IntegratedObservation) -> Self {
        // ---
        let (hour_of_day, day_of_week, month) = calendar_features(obs.observed_at);

        MlViewRow {
            id: obs.id,
            observed_at: obs.observed_at,
            soil_moisture: obs.soil_moisture,
            soil_temperature: obs.soil_temperature,
            soil_ph: obs.soil_ph,
            phosphorus_present: obs.phosphorus_present,
            potassium_present: obs.potassium_present,
            pump_on: obs.pump_on,
            ambient_temperature: obs.ambient_temperature,
            ambient_humidity: obs.ambient_humidity,
            pressure: obs.pressure,
            wind_speed: obs.wind_speed,
            rain_probability: obs.rain_probability,
            rain_amount: obs.rain_amount,
            uv_index: obs.uv_index,
            visibility: obs.visibility,
            temperature_gap: obs.temperature_gap,
            humidity_deficit: obs.humidity_deficit,
            evapotranspiration_factor: obs.evapotranspiration_factor,
            hour_of_day,
            day_of_week,
            month,
            will_rain_today: obs.rain_probability > WILL_RAIN_PROBABILITY,
            high_wind: obs.wind_speed > HIGH_WIND_SPEED,
            hot_day: obs.ambient_temperature > HOT_DAY_TEMPERATURE,
        }
    }
}

/// The three logical record sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSet {
    Readings,
    Weather,
    Integrated,
}
