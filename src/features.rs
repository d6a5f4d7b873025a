//! Feature extraction for the irrigation advisor.
//!
//! Column selection is driven by a versioned [`FeatureSchema`]: an ordered
//! list of required and optional columns, resolved once per extraction call
//! against the rows actually read. Integrated observations are preferred;
//! raw readings are the fallback when fewer than [`MIN_ROWS`] integrated rows
//! exist.

use serde::Serialize;

use crate::error::{AdvisorError, InsufficientDataError};
use crate::models::{calendar_features, MlViewRow, RecordSet, SensorReading};
use crate::store::{Session, SessionPool};

/// Fewest rows a feature table (and therefore a training run) may have.
pub const MIN_ROWS: usize = 10;

/// Whether a column must be present on every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Required,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureColumn {
    pub name: &'static str,
    pub presence: Presence,
}

const fn required(name: &'static str) -> FeatureColumn {
    FeatureColumn {
        name,
        presence: Presence::Required,
    }
}

const fn optional(name: &'static str) -> FeatureColumn {
    FeatureColumn {
        name,
        presence: Presence::Optional,
    }
}

/// Which record set a table was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    Integrated,
    RawOnly,
}

/// Ordered, versioned column layout of a feature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureSchema {
    pub version: &'static str,
    pub source: FeatureSource,
    pub columns: &'static [FeatureColumn],
}

pub const INTEGRATED_SCHEMA: FeatureSchema = FeatureSchema {
    version: "integrated/v1",
    source: FeatureSource::Integrated,
    columns: &[
        required("soil_moisture"),
        required("soil_temperature"),
        required("soil_ph"),
        required("phosphorus_present"),
        required("potassium_present"),
        required("pump_on"),
        required("ambient_temperature"),
        required("ambient_humidity"),
        required("pressure"),
        required("wind_speed"),
        required("rain_probability"),
        required("rain_amount"),
        optional("uv_index"),
        optional("visibility"),
        required("temperature_gap"),
        required("humidity_deficit"),
        required("evapotranspiration_factor"),
        required("hour_of_day"),
        required("day_of_week"),
        required("month"),
        required("will_rain_today"),
        required("high_wind"),
        required("hot_day"),
    ],
};

pub const RAW_SCHEMA: FeatureSchema = FeatureSchema {
    version: "raw/v1",
    source: FeatureSource::RawOnly,
    columns: &[
        required("soil_moisture"),
        required("soil_temperature"),
        required("soil_ph"),
        required("phosphorus_present"),
        required("potassium_present"),
        required("pump_on"),
        required("hour_of_day"),
        required("day_of_week"),
        required("month"),
    ],
};

/// A row that can be projected by column name.
pub trait FeatureRow {
    fn feature(&self, name: &str) -> Option<f64>;
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl FeatureRow for MlViewRow {
    fn feature(&self, name: &str) -> Option<f64> {
        // ---
        let value = match name {
            "soil_moisture" => self.soil_moisture,
            "soil_temperature" => self.soil_temperature,
            "soil_ph" => self.soil_ph,
            "phosphorus_present" => flag(self.phosphorus_present),
            "potassium_present" => flag(self.potassium_present),
            "pump_on" => flag(self.pump_on),
            "ambient_temperature" => self.ambient_temperature,
            "ambient_humidity" => self.ambient_humidity,
            "pressure" => self.pressure,
            "wind_speed" => self.wind_speed,
            "rain_probability" => self.rain_probability,
            "rain_amount" => self.rain_amount,
            "uv_index" => return self.uv_index,
            "visibility" => return self.visibility,
            "temperature_gap" => self.temperature_gap,
            "humidity_deficit" => self.humidity_deficit,
            "evapotranspiration_factor" => self.evapotranspiration_factor,
            "hour_of_day" => f64::from(self.hour_of_day),
            "day_of_week" => f64::from(self.day_of_week),
            "month" => f64::from(self.month),
            "will_rain_today" => flag(self.will_rain_today),
            "high_wind" => flag(self.high_wind),
            "hot_day" => flag(self.hot_day),
            _ => return None,
        };
        Some(value)
    }
}

impl FeatureRow for SensorReading {
    fn feature(&self, name: &str) -> Option<f64> {
        // ---
        let (hour, dow, month) = calendar_features(self.observed_at);
        let value = match name {
            "soil_moisture" => self.soil_moisture,
            "soil_temperature" => self.soil_temperature,
            "soil_ph" => self.soil_ph,
            "phosphorus_present" => flag(self.phosphorus_present),
            "potassium_present" => flag(self.potassium_present),
            "pump_on" => flag(self.pump_on),
            "hour_of_day" => f64::from(hour),
            "day_of_week" => f64::from(dow),
            "month" => f64::from(month),
            _ => return None,
        };
        Some(value)
    }
}

/// Flat numeric table handed to the advisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureTable {
    pub schema_version: &'static str,
    pub source: FeatureSource,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    /// Rows skipped for lacking a required column.
    pub skipped_rows: usize,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }
}

impl FeatureSchema {
    /// Resolve this schema against `rows` into a table.
    ///
    /// Rows missing a required column are skipped. Optional columns absent
    /// from every kept row are dropped; partial gaps get the column mean.
    pub fn resolve<R: FeatureRow>(&self, rows: &[R]) -> FeatureTable {
        // ---
        let mut skipped_rows = 0;
        let mut cells: Vec<Vec<Option<f64>>> = Vec::with_capacity(rows.len());
        for row in rows {
            let values: Vec<Option<f64>> = self.columns.iter().map(|c| row.feature(c.name)).collect();
            let complete = self
                .columns
                .iter()
                .zip(&values)
                .all(|(c, v)| c.presence == Presence::Optional || v.is_some());
            if complete {
                cells.push(values);
            } else {
                skipped_rows += 1;
            }
        }

        let mut keep = Vec::new();
        let mut fill = Vec::new();
        for (idx, column) in self.columns.iter().enumerate() {
            let present: Vec<f64> = cells.iter().filter_map(|row| row[idx]).collect();
            if present.is_empty() && column.presence == Presence::Optional {
                tracing::debug!("Dropping optional column `{}`: no values", column.name);
                continue;
            }
            let mean = if present.is_empty() {
                0.0
            } else {
                present.iter().sum::<f64>() / present.len() as f64
            };
            keep.push(idx);
            fill.push(mean);
        }

        let table_rows = cells
            .iter()
            .map(|row| {
                keep.iter()
                    .zip(&fill)
                    .map(|(&idx, &mean)| row[idx].unwrap_or(mean))
                    .collect()
            })
            .collect();

        if skipped_rows > 0 {
            tracing::warn!("Skipped {} rows missing required {} columns", skipped_rows, self.version);
        }

        FeatureTable {
            schema_version: self.version,
            source: self.source,
            columns: keep.iter().map(|&idx| self.columns[idx].name.to_string()).collect(),
            rows: table_rows,
            skipped_rows,
        }
    }
}

/// Reads history through the pool into a feature table.
pub struct FeatureExtractor<P: SessionPool> {
    pool: P,
}

impl<P: SessionPool> Clone for FeatureExtractor<P> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<P: SessionPool> FeatureExtractor<P> {
    pub fn new(pool: P) -> Self {
        Self { pool }
    }

    /// Most recent `limit` rows as a flat table.
    ///
    /// Integrated rows when at least [`MIN_ROWS`] exist, else raw rows when
    /// at least [`MIN_ROWS`] exist, else [`InsufficientDataError`].
    pub async fn extract(&self, limit: u32) -> Result<FeatureTable, AdvisorError> {
        // ---
        let mut session = self.pool.acquire().await?;

        let integrated = session.count(RecordSet::Integrated).await? as usize;
        let table = if integrated >= MIN_ROWS {
            let rows = session.ml_view(limit).await?;
            INTEGRATED_SCHEMA.resolve(&rows)
        } else {
            let raw = session.count(RecordSet::Readings).await? as usize;
            if raw < MIN_ROWS {
                return Err(InsufficientDataError {
                    available: raw.max(integrated),
                    required: MIN_ROWS,
                }
                .into());
            }
            tracing::info!(
                "Only {} integrated rows, falling back to {} raw readings",
                integrated,
                raw
            );
            let rows = session.list_readings(Some(limit)).await?;
            RAW_SCHEMA.resolve(&rows)
        };
        drop(session);

        if table.len() < MIN_ROWS {
            return Err(InsufficientDataError {
                available: table.len(),
                required: MIN_ROWS,
            }
            .into());
        }

        tracing::debug!(
            "Extracted {} rows x {} columns ({})",
            table.len(),
            table.columns.len(),
            table.schema_version
        );
        Ok(table)
    }
}
