//! OpenWeatherMap current-weather client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::WeatherSource;
use crate::derive::{round1, round2};
use crate::error::WeatherSourceError;
use crate::models::WeatherSnapshot;

pub const SOURCE_LABEL: &str = "openweathermap";

/// Live weather from the OpenWeatherMap `weather` endpoint (metric units).
#[derive(Debug, Clone)]
pub struct OpenWeatherSource {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    city: String,
}

impl OpenWeatherSource {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        city: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, WeatherSourceError> {
        // ---
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            city: city.into(),
        })
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherSource {
    fn label(&self) -> &str {
        SOURCE_LABEL
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<WeatherSnapshot, WeatherSourceError> {
        // ---
        tracing::debug!("Fetching live weather for {}", self.city);

        let response: Value = self
            .client
            .get(&self.api_url)
            .query(&[
                ("q", self.city.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_current_weather(&response, now)
    }
}

fn number(response: &Value, path: &[&str]) -> Option<f64> {
    path.iter()
        .try_fold(response, |node, key| node.get(key))
        .and_then(Value::as_f64)
}

fn required(response: &Value, path: &[&str]) -> Result<f64, WeatherSourceError> {
    number(response, path).ok_or_else(|| WeatherSourceError::Malformed(format!("missing `{}`", path.join("."))))
}

/// 8-point compass sector of a bearing in degrees.
pub fn compass_point(degrees: f64) -> &'static str {
    // ---
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let sector = ((degrees.rem_euclid(360.0) + 22.5) / 45.0).floor() as usize % 8;
    POINTS[sector]
}

/// Map a current-weather response body into a snapshot.
pub fn parse_current_weather(response: &Value, now: DateTime<Utc>) -> Result<WeatherSnapshot, WeatherSourceError> {
    // ---
    let ambient_temperature = required(response, &["main", "temp"])?;
    let ambient_humidity = required(response, &["main", "humidity"])?;
    let pressure = required(response, &["main", "pressure"])?;

    // m/s → km/h
    let wind_speed = number(response, &["wind", "speed"]).unwrap_or(0.0) * 3.6;
    let wind_direction = number(response, &["wind", "deg"]).map(compass_point).unwrap_or("N");

    let rain_amount = number(response, &["rain", "1h"]).unwrap_or(0.0).max(0.0);
    let cloud_cover = number(response, &["clouds", "all"]).unwrap_or(0.0);
    let rain_probability = if rain_amount > 0.0 {
        100.0
    } else {
        (cloud_cover * 0.5).clamp(0.0, 100.0)
    };

    let condition = response
        .get("weather")
        .and_then(|w| w.get(0))
        .and_then(|w| w.get("description"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    Ok(WeatherSnapshot {
        collected_at: now,
        ambient_temperature: round1(ambient_temperature),
        ambient_humidity: round1(ambient_humidity),
        pressure: round2(pressure),
        wind_speed: round1(wind_speed),
        wind_direction: wind_direction.to_string(),
        condition,
        rain_probability: round1(rain_probability),
        rain_amount: round2(rain_amount),
        uv_index: None,
        // metres → km
        visibility: number(response, &["visibility"]).map(|m| round1(m / 1000.0)),
        source_label: SOURCE_LABEL.to_string(),
    })
}
