//! Weather snapshot source.
//!
//! [`WeatherCollector::collect`] never fails: a configured live source is
//! tried under a short timeout, and any error or timeout falls back to the
//! synthetic model. The result is tagged with its provenance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::error::WeatherSourceError;
use crate::models::WeatherSnapshot;

pub mod live;
pub mod synthetic;

pub use live::OpenWeatherSource;
pub use synthetic::SyntheticWeather;

/// A live weather provider.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Short name stored as the snapshot's `source_label`.
    fn label(&self) -> &str;

    async fn fetch(&self, now: DateTime<Utc>) -> Result<WeatherSnapshot, WeatherSourceError>;
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Live,
    Synthetic,
}

/// A collected snapshot tagged with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub enum Collected {
    Live(WeatherSnapshot),
    Synthetic(WeatherSnapshot),
}

impl Collected {
    pub fn provenance(&self) -> Provenance {
        match self {
            Collected::Live(_) => Provenance::Live,
            Collected::Synthetic(_) => Provenance::Synthetic,
        }
    }

    pub fn snapshot(&self) -> &WeatherSnapshot {
        match self {
            Collected::Live(s) | Collected::Synthetic(s) => s,
        }
    }

    pub fn into_snapshot(self) -> WeatherSnapshot {
        match self {
            Collected::Live(s) | Collected::Synthetic(s) => s,
        }
    }
}

/// Live-first, synthetic-fallback snapshot collector.
#[derive(Clone)]
pub struct WeatherCollector {
    live: Option<Arc<dyn WeatherSource>>,
    timeout: Duration,
    synthetic: SyntheticWeather,
}

impl WeatherCollector {
    /// Collector that only synthesizes.
    pub fn synthetic(field_offset: FixedOffset) -> Self {
        Self {
            live: None,
            timeout: Duration::from_secs(3),
            synthetic: SyntheticWeather::new(field_offset),
        }
    }

    /// Collector that tries `live` first, for at most `timeout`.
    pub fn with_live(live: Arc<dyn WeatherSource>, timeout: Duration, field_offset: FixedOffset) -> Self {
        Self {
            live: Some(live),
            timeout,
            synthetic: SyntheticWeather::new(field_offset),
        }
    }

    pub fn has_live_source(&self) -> bool {
        self.live.is_some()
    }

    /// Snapshot for `now`. Never fails.
    pub async fn collect(&self, now: DateTime<Utc>) -> Collected {
        // ---
        if let Some(live) = &self.live {
            let outcome = match tokio::time::timeout(self.timeout, live.fetch(now)).await {
                Ok(result) => result,
                Err(_) => Err(WeatherSourceError::Timeout(self.timeout)),
            };
            match outcome {
                Ok(snapshot) => return Collected::Live(snapshot),
                Err(e) => {
                    tracing::warn!(
                        "Live weather source `{}` failed, using synthetic model: {}",
                        live.label(),
                        e
                    );
                }
            }
        }

        Collected::Synthetic(self.synthetic.generate(now, &mut rand::thread_rng()))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    struct FailingSource;

    #[async_trait]
    impl WeatherSource for FailingSource {
        fn label(&self) -> &str {
            "failing"
        }

        async fn fetch(&self, _now: DateTime<Utc>) -> Result<WeatherSnapshot, WeatherSourceError> {
            Err(WeatherSourceError::Malformed("no `main` object".to_string()))
        }
    }

    struct SlowSource(Duration);

    #[async_trait]
    impl WeatherSource for SlowSource {
        fn label(&self) -> &str {
            "slow"
        }

        async fn fetch(&self, now: DateTime<Utc>) -> Result<WeatherSnapshot, WeatherSourceError> {
            tokio::time::sleep(self.0).await;
            Ok(fixed_snapshot(now))
        }
    }

    struct FixedSource;

    #[async_trait]
    impl WeatherSource for FixedSource {
        fn label(&self) -> &str {
            "fixed"
        }

        async fn fetch(&self, now: DateTime<Utc>) -> Result<WeatherSnapshot, WeatherSourceError> {
            Ok(fixed_snapshot(now))
        }
    }

    fn fixed_snapshot(now: DateTime<Utc>) -> WeatherSnapshot {
        // ---
        WeatherSnapshot {
            collected_at: now,
            ambient_temperature: 27.0,
            ambient_humidity: 66.0,
            pressure: 1012.0,
            wind_speed: 9.0,
            wind_direction: "NE".to_string(),
            condition: "Clear sky".to_string(),
            rain_probability: 10.0,
            rain_amount: 0.0,
            uv_index: None,
            visibility: Some(10.0),
            source_label: "fixed".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 10, 14, 0, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[tokio::test]
    async fn test_live_success_is_tagged_live() {
        // ---
        let collector = WeatherCollector::with_live(Arc::new(FixedSource), Duration::from_secs(1), utc());
        let collected = collector.collect(now()).await;
        assert_eq!(collected.provenance(), Provenance::Live);
        assert_eq!(collected.snapshot().source_label, "fixed");
    }

    #[tokio::test]
    async fn test_live_error_falls_back_to_synthetic() {
        // ---
        let collector = WeatherCollector::with_live(Arc::new(FailingSource), Duration::from_secs(1), utc());
        let collected = collector.collect(now()).await;
        assert_eq!(collected.provenance(), Provenance::Synthetic);
        assert_eq!(collected.snapshot().source_label, synthetic::SOURCE_LABEL);
        assert_eq!(collected.snapshot().collected_at, now());
    }

    #[tokio::test]
    async fn test_live_timeout_falls_back_within_bound() {
        // ---
        let collector = WeatherCollector::with_live(
            Arc::new(SlowSource(Duration::from_secs(5))),
            Duration::from_millis(50),
            utc(),
        );
        let started = std::time::Instant::now();
        let collected = collector.collect(now()).await;

        assert_eq!(collected.provenance(), Provenance::Synthetic);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_no_live_source_synthesizes() {
        // ---
        let collector = WeatherCollector::synthetic(utc());
        assert!(!collector.has_live_source());
        let snapshot = collector.collect(now()).await.into_snapshot();
        assert!((45.0..=95.0).contains(&snapshot.ambient_humidity));
    }
}
