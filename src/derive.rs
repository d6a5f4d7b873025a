//! Derived agronomic indicators of one reading under one weather snapshot.
//!
//! Pure functions only. Results are rounded to two decimals so that values
//! recomputed later compare equal to the stored ones.

use serde::Serialize;

use crate::models::{SensorReading, WeatherSnapshot};

/// Indicators stored alongside each integrated observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedFeatures {
    pub temperature_gap: f64,
    pub humidity_deficit: f64,
    pub evapotranspiration_factor: f64,
}

/// Combine a reading and a snapshot into the derived indicators.
pub fn derive(reading: &SensorReading, snapshot: &WeatherSnapshot) -> DerivedFeatures {
    DerivedFeatures {
        temperature_gap: temperature_gap(snapshot.ambient_temperature, reading.soil_temperature),
        humidity_deficit: humidity_deficit(snapshot.ambient_humidity, reading.soil_moisture),
        evapotranspiration_factor: evapotranspiration_factor(
            snapshot.ambient_temperature,
            snapshot.wind_speed,
            snapshot.ambient_humidity,
        ),
    }
}

/// `ambient_temperature − soil_temperature`
pub fn temperature_gap(ambient_temperature: f64, soil_temperature: f64) -> f64 {
    round2(ambient_temperature - soil_temperature)
}

/// `ambient_humidity − soil_moisture`
pub fn humidity_deficit(ambient_humidity: f64, soil_moisture: f64) -> f64 {
    round2(ambient_humidity - soil_moisture)
}

/// `0.4·temperature + 0.3·wind + 0.3·(100 − humidity)`
pub fn evapotranspiration_factor(ambient_temperature: f64, wind_speed: f64, ambient_humidity: f64) -> f64 {
    round2(0.4 * ambient_temperature + 0.3 * wind_speed + 0.3 * (100.0 - ambient_humidity))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
