//! Irrigation advisor: a pump-state classifier and a soil-moisture regressor
//! trained over the extracted feature table, plus the recommendation rule
//! that combines them.
//!
//! Models are rebuilt from scratch on every training request and held in
//! process memory. A new fit replaces the previous one atomically; readers
//! never observe a half-trained model.

mod linear;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::derive::{evapotranspiration_factor, temperature_gap};
use crate::error::{AdvisorError, InsufficientDataError, ValidationError};
use crate::features::{FeatureExtractor, FeatureSource, FeatureTable, MIN_ROWS};
use crate::models::{HIGH_WIND_SPEED, HOT_DAY_TEMPERATURE, WILL_RAIN_PROBABILITY};
use crate::store::SessionPool;

pub use linear::{
    accuracy, normalized_importance, rmse, train_test_split, LinearModel, LinearRegression,
    LogisticRegression, Standardizer,
};

/// Seed of the train/test shuffle.
pub const SPLIT_SEED: u64 = 42;
/// Irrigate when the classifier is more confident than this.
pub const PROBABILITY_THRESHOLD: f64 = 0.5;
/// Irrigate when predicted moisture without irrigation is below this (%).
pub const MOISTURE_THRESHOLD: f64 = 30.0;

const CLASSIFIER_TARGET: &str = "pump_on";
const REGRESSOR_TARGET: &str = "soil_moisture";
/// Columns that encode the moisture target and must not be inputs.
const MOISTURE_LEAKS: [&str; 2] = ["soil_moisture", "humidity_deficit"];

// ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierReport {
    pub accuracy: f64,
    pub features: Vec<String>,
    pub importances: Vec<FeatureImportance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressorReport {
    pub rmse: f64,
    pub features: Vec<String>,
    pub importances: Vec<FeatureImportance>,
}

/// Outcome of one training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub schema_version: &'static str,
    pub source: FeatureSource,
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub classifier: ClassifierReport,
    pub regressor: RegressorReport,
}

/// One fitted model with the columns it reads and its input scaling.
#[derive(Debug, Clone)]
struct Fitted<M: LinearModel> {
    features: Vec<String>,
    scaler: Standardizer,
    model: M,
}

impl<M: LinearModel> Fitted<M> {
    fn fit(table: &FeatureTable, features: Vec<String>, target: &[f64], train: &[usize]) -> Self {
        // ---
        let x = project(table, &features, train);
        let y: Vec<f64> = train.iter().map(|&i| target[i]).collect();
        let scaler = Standardizer::fit(&x);
        let scaled: Vec<Vec<f64>> = x.iter().map(|row| scaler.transform(row)).collect();
        let model = M::fit(&scaled, &y);
        Self {
            features,
            scaler,
            model,
        }
    }

    fn predict_rows(&self, table: &FeatureTable, rows: &[usize]) -> Vec<f64> {
        project(table, &self.features, rows)
            .iter()
            .map(|row| self.model.predict(&self.scaler.transform(row)))
            .collect()
    }

    /// Predict from named values; absent features take the training mean.
    fn predict_named(&self, values: &HashMap<&'static str, f64>) -> f64 {
        // ---
        let row: Vec<f64> = self
            .features
            .iter()
            .zip(&self.scaler.means)
            .map(|(name, mean)| values.get(name.as_str()).copied().unwrap_or(*mean))
            .collect();
        self.model.predict(&self.scaler.transform(&row))
    }

    fn importances(&self) -> Vec<FeatureImportance> {
        // ---
        let mut ranked: Vec<FeatureImportance> = self
            .features
            .iter()
            .zip(normalized_importance(self.model.weights()))
            .map(|(feature, importance)| FeatureImportance {
                feature: feature.clone(),
                importance,
            })
            .collect();
        ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        ranked
    }
}

fn project(table: &FeatureTable, features: &[String], rows: &[usize]) -> Vec<Vec<f64>> {
    let idx: Vec<usize> = features.iter().filter_map(|f| table.column_index(f)).collect();
    rows.iter()
        .map(|&r| idx.iter().map(|&c| table.rows[r][c]).collect())
        .collect()
}

/// The classifier and regressor of one training run.
#[derive(Debug, Clone)]
pub struct TrainedModels {
    classifier: Fitted<LogisticRegression>,
    regressor: Fitted<LinearRegression>,
    report: TrainingReport,
}

impl TrainedModels {
    /// Fit both models over `table`. Refuses below [`MIN_ROWS`] before any
    /// fitting starts.
    pub fn fit(table: &FeatureTable) -> Result<Self, InsufficientDataError> {
        // ---
        let insufficient = InsufficientDataError {
            available: table.len(),
            required: MIN_ROWS,
        };
        if table.len() < MIN_ROWS {
            return Err(insufficient);
        }
        let (Some(pump), Some(moisture)) =
            (table.column(CLASSIFIER_TARGET), table.column(REGRESSOR_TARGET))
        else {
            return Err(insufficient);
        };

        let (train, test) = train_test_split(table.len(), SPLIT_SEED);

        let classifier_features: Vec<String> = table
            .columns
            .iter()
            .filter(|c| c.as_str() != CLASSIFIER_TARGET && !MOISTURE_LEAKS.contains(&c.as_str()))
            .cloned()
            .collect();
        let regressor_features: Vec<String> = table
            .columns
            .iter()
            .filter(|c| !MOISTURE_LEAKS.contains(&c.as_str()))
            .cloned()
            .collect();

        let classifier = Fitted::<LogisticRegression>::fit(table, classifier_features, &pump, &train);
        let regressor = Fitted::<LinearRegression>::fit(table, regressor_features, &moisture, &train);

        let test_pump: Vec<f64> = test.iter().map(|&i| pump[i]).collect();
        let test_moisture: Vec<f64> = test.iter().map(|&i| moisture[i]).collect();

        let report = TrainingReport {
            schema_version: table.schema_version,
            source: table.source,
            rows: table.len(),
            train_rows: train.len(),
            test_rows: test.len(),
            classifier: ClassifierReport {
                accuracy: accuracy(&classifier.predict_rows(table, &test), &test_pump),
                features: classifier.features.clone(),
                importances: classifier.importances(),
            },
            regressor: RegressorReport {
                rmse: rmse(&regressor.predict_rows(table, &test), &test_moisture),
                features: regressor.features.clone(),
                importances: regressor.importances(),
            },
        };

        Ok(Self {
            classifier,
            regressor,
            report,
        })
    }

    pub fn report(&self) -> &TrainingReport {
        &self.report
    }
}

// ---

/// Weather side of a what-if scenario. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioWeather {
    pub ambient_temperature: Option<f64>,
    pub ambient_humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub rain_probability: Option<f64>,
}

/// Conditions to ask the advisor about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub soil_temperature: f64,
    pub soil_ph: f64,
    #[serde(default)]
    pub phosphorus_present: bool,
    #[serde(default)]
    pub potassium_present: bool,
    pub hour_of_day: u32,
    #[serde(flatten)]
    pub weather: ScenarioWeather,
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl Scenario {
    /// Reject values no reading could carry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        // ---
        if self.hour_of_day > 23 {
            return Err(ValidationError::OutOfRange {
                field: "hour_of_day",
                value: f64::from(self.hour_of_day),
                min: 0.0,
                max: 23.0,
            });
        }
        let numbers = [
            ("soil_temperature", Some(self.soil_temperature)),
            ("soil_ph", Some(self.soil_ph)),
            ("ambient_temperature", self.weather.ambient_temperature),
            ("ambient_humidity", self.weather.ambient_humidity),
            ("wind_speed", self.weather.wind_speed),
            ("rain_probability", self.weather.rain_probability),
        ];
        for (field, value) in numbers {
            if let Some(value) = value.filter(|v| !v.is_finite()) {
                return Err(ValidationError::NonFinite { field, value });
            }
        }
        Ok(())
    }

    /// Named feature values this scenario supplies, including derived
    /// weather indicators when their inputs are present.
    pub fn feature_values(&self, pump_on: bool) -> HashMap<&'static str, f64> {
        // ---
        let mut values = HashMap::from([
            ("soil_temperature", self.soil_temperature),
            ("soil_ph", self.soil_ph),
            ("phosphorus_present", flag(self.phosphorus_present)),
            ("potassium_present", flag(self.potassium_present)),
            ("pump_on", flag(pump_on)),
            ("hour_of_day", f64::from(self.hour_of_day)),
        ]);

        let w = &self.weather;
        if let Some(temp) = w.ambient_temperature {
            values.insert("ambient_temperature", temp);
            values.insert("temperature_gap", temperature_gap(temp, self.soil_temperature));
            values.insert("hot_day", flag(temp > HOT_DAY_TEMPERATURE));
        }
        if let Some(humidity) = w.ambient_humidity {
            values.insert("ambient_humidity", humidity);
        }
        if let Some(wind) = w.wind_speed {
            values.insert("wind_speed", wind);
            values.insert("high_wind", flag(wind > HIGH_WIND_SPEED));
        }
        if let Some(rain) = w.rain_probability {
            values.insert("rain_probability", rain);
            values.insert("will_rain_today", flag(rain > WILL_RAIN_PROBABILITY));
        }
        if let (Some(temp), Some(wind), Some(humidity)) = (w.ambient_temperature, w.wind_speed, w.ambient_humidity) {
            values.insert(
                "evapotranspiration_factor",
                evapotranspiration_factor(temp, wind, humidity),
            );
        }
        values
    }
}

/// Anything that can score a scenario.
pub trait Predictor {
    /// Probability that the pump should be on.
    fn irrigation_probability(&self, scenario: &Scenario) -> f64;
    /// Expected soil moisture (%) with the pump in the given state.
    fn predicted_moisture(&self, scenario: &Scenario, pump_on: bool) -> f64;
}

impl Predictor for TrainedModels {
    fn irrigation_probability(&self, scenario: &Scenario) -> f64 {
        self.classifier.predict_named(&scenario.feature_values(false))
    }

    fn predicted_moisture(&self, scenario: &Scenario, pump_on: bool) -> f64 {
        self.regressor.predict_named(&scenario.feature_values(pump_on))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Irrigate,
    DoNotIrrigate,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Irrigate => f.write_str("irrigate"),
            Action::DoNotIrrigate => f.write_str("do not irrigate"),
        }
    }
}

/// The fixed business rule: irrigate if the classifier says so or the soil
/// would dry out without water.
pub fn decide(irrigation_probability: f64, moisture_without_irrigation: f64) -> Action {
    if irrigation_probability > PROBABILITY_THRESHOLD || moisture_without_irrigation < MOISTURE_THRESHOLD {
        Action::Irrigate
    } else {
        Action::DoNotIrrigate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub action: Action,
    pub recommendation: String,
    pub irrigation_probability: f64,
    pub moisture_without_irrigation: f64,
    pub moisture_with_irrigation: f64,
}

/// Score `scenario` with `predictor` and apply [`decide`].
pub fn recommend_with<P: Predictor + ?Sized>(predictor: &P, scenario: &Scenario) -> Recommendation {
    // ---
    let irrigation_probability = predictor.irrigation_probability(scenario);
    let moisture_without_irrigation = predictor.predicted_moisture(scenario, false);
    let moisture_with_irrigation = predictor.predicted_moisture(scenario, true);
    let action = decide(irrigation_probability, moisture_without_irrigation);

    Recommendation {
        action,
        recommendation: action.to_string(),
        irrigation_probability,
        moisture_without_irrigation,
        moisture_with_irrigation,
    }
}

// ---

/// Trains on demand and serves recommendations from the latest fit.
pub struct IrrigationAdvisor<P: SessionPool> {
    extractor: FeatureExtractor<P>,
    training: Mutex<()>,
    current: RwLock<Option<Arc<TrainedModels>>>,
}

impl<P: SessionPool> IrrigationAdvisor<P> {
    pub fn new(extractor: FeatureExtractor<P>) -> Self {
        Self {
            extractor,
            training: Mutex::new(()),
            current: RwLock::new(None),
        }
    }

    /// Extract up to `limit` rows and fit both models.
    ///
    /// One training run at a time; concurrent callers queue. The previous
    /// model stays in service until the new one is complete.
    pub async fn train(&self, limit: u32) -> Result<TrainingReport, AdvisorError> {
        // ---
        let _exclusive = self.training.lock().await;

        let table = self.extractor.extract(limit).await.inspect_err(|e| {
            tracing::warn!("Training refused: {}", e);
        })?;
        let models = TrainedModels::fit(&table)?;
        let report = models.report().clone();

        match self.current.write() {
            Ok(mut slot) => *slot = Some(Arc::new(models)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::new(models)),
        }

        tracing::info!(
            "Trained on {} rows ({}): accuracy {:.3}, rmse {:.3}",
            report.rows,
            report.schema_version,
            report.classifier.accuracy,
            report.regressor.rmse
        );
        Ok(report)
    }

    /// The latest trained models, if any.
    pub fn current(&self) -> Option<Arc<TrainedModels>> {
        match self.current.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn recommend(&self, scenario: &Scenario) -> Result<Recommendation, AdvisorError> {
        // ---
        scenario.validate()?;
        let models = self.current().ok_or(AdvisorError::NotTrained)?;
        let recommendation = recommend_with(models.as_ref(), scenario);
        tracing::debug!(
            "Recommendation `{}` (p={:.3}, moisture {:.1})",
            recommendation.recommendation,
            recommendation.irrigation_probability,
            recommendation.moisture_without_irrigation
        );
        Ok(recommendation)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::features::RAW_SCHEMA;

    /// Predictor with fixed outputs.
    struct Fixed {
        probability: f64,
        moisture: f64,
    }

    impl Predictor for Fixed {
        fn irrigation_probability(&self, _: &Scenario) -> f64 {
            self.probability
        }

        fn predicted_moisture(&self, _: &Scenario, pump_on: bool) -> f64 {
            if pump_on {
                self.moisture + 20.0
            } else {
                self.moisture
            }
        }
    }

    /// Moisture falls with evapotranspiration pressure.
    struct EvaporationDriven;

    impl Predictor for EvaporationDriven {
        fn irrigation_probability(&self, _: &Scenario) -> f64 {
            0.2
        }

        fn predicted_moisture(&self, scenario: &Scenario, pump_on: bool) -> f64 {
            let values = scenario.feature_values(pump_on);
            let et = values.get("evapotranspiration_factor").copied().unwrap_or(20.0);
            60.0 - et + if pump_on { 25.0 } else { 0.0 }
        }
    }

    fn create_test_scenario(weather: ScenarioWeather) -> Scenario {
        // ---
        Scenario {
            soil_temperature: 24.0,
            soil_ph: 6.5,
            phosphorus_present: true,
            potassium_present: false,
            hour_of_day: 13,
            weather,
        }
    }

    fn create_test_table(rows: usize) -> FeatureTable {
        // ---
        let data = (0..rows)
            .map(|i| {
                let pump = (i % 2) as f64;
                let moisture = 40.0 + 10.0 * pump + (i % 3) as f64;
                vec![moisture, 20.0 + (i % 4) as f64, 6.5, 1.0, 0.0, pump, (i % 24) as f64, 2.0, 6.0]
            })
            .collect();
        FeatureTable {
            schema_version: RAW_SCHEMA.version,
            source: FeatureSource::RawOnly,
            columns: RAW_SCHEMA.columns.iter().map(|c| c.name.to_string()).collect(),
            rows: data,
            skipped_rows: 0,
        }
    }

    #[test]
    fn test_or_rule_boundaries() {
        // ---
        assert_eq!(decide(0.5, 30.0), Action::DoNotIrrigate);
        assert_eq!(decide(0.51, 30.0), Action::Irrigate);
        assert_eq!(decide(0.5, 29.99), Action::Irrigate);
        assert_eq!(decide(0.9, 10.0), Action::Irrigate);
        assert_eq!(decide(0.0, 100.0), Action::DoNotIrrigate);
    }

    #[test]
    fn test_recommend_with_mock_outputs() {
        // ---
        let scenario = create_test_scenario(ScenarioWeather::default());

        let dry = recommend_with(&Fixed { probability: 0.1, moisture: 25.0 }, &scenario);
        assert_eq!(dry.action, Action::Irrigate);
        assert_eq!(dry.recommendation, "irrigate");
        assert_eq!(dry.moisture_with_irrigation, 45.0);

        let wet = recommend_with(&Fixed { probability: 0.4, moisture: 55.0 }, &scenario);
        assert_eq!(wet.action, Action::DoNotIrrigate);
        assert_eq!(wet.recommendation, "do not irrigate");
    }

    #[test]
    fn test_hot_dry_windy_scenario_irrigates() {
        // ---
        let scenario = create_test_scenario(ScenarioWeather {
            ambient_temperature: Some(35.0),
            ambient_humidity: Some(40.0),
            wind_speed: Some(20.0),
            rain_probability: None,
        });
        let values = scenario.feature_values(false);
        assert_eq!(values["evapotranspiration_factor"], 38.0);
        assert_eq!(values["hot_day"], 1.0);
        assert_eq!(values["high_wind"], 1.0);
        assert!(!values.contains_key("will_rain_today"));

        let rec = recommend_with(&EvaporationDriven, &scenario);
        assert_eq!(rec.action, Action::Irrigate);
        assert!(rec.moisture_without_irrigation < MOISTURE_THRESHOLD);
    }

    #[test]
    fn test_scenario_hour_must_be_on_the_clock() {
        // ---
        let mut scenario = create_test_scenario(ScenarioWeather::default());
        scenario.hour_of_day = 23;
        assert!(scenario.validate().is_ok());

        scenario.hour_of_day = 99;
        assert_eq!(
            scenario.validate(),
            Err(ValidationError::OutOfRange {
                field: "hour_of_day",
                value: 99.0,
                min: 0.0,
                max: 23.0,
            })
        );
    }

    #[test]
    fn test_fit_refuses_small_tables() {
        // ---
        let err = TrainedModels::fit(&create_test_table(9)).unwrap_err();
        assert_eq!(err, InsufficientDataError { available: 9, required: 10 });
    }

    #[test]
    fn test_fit_feature_sets_exclude_moisture_leaks() {
        // ---
        let models = TrainedModels::fit(&create_test_table(20)).unwrap();
        let report = models.report();

        assert_eq!(report.test_rows, 4);
        assert_eq!(report.train_rows, 16);
        assert!(!report.classifier.features.iter().any(|f| f == "pump_on" || f == "soil_moisture"));
        assert!(report.regressor.features.iter().any(|f| f == "pump_on"));
        assert!(!report.regressor.features.iter().any(|f| f == "soil_moisture"));
        assert!((0.0..=1.0).contains(&report.classifier.accuracy));

        let total: f64 = report.classifier.importances.iter().map(|i| i.importance).sum();
        assert!((total - 1.0).abs() < 1e-9);
        let sorted = report
            .regressor
            .importances
            .windows(2)
            .all(|w| w[0].importance >= w[1].importance);
        assert!(sorted);
    }

    #[test]
    fn test_trained_regressor_responds_to_pump() {
        // ---
        let models = TrainedModels::fit(&create_test_table(30)).unwrap();
        let scenario = create_test_scenario(ScenarioWeather::default());
        assert!(models.predicted_moisture(&scenario, true) > models.predicted_moisture(&scenario, false));
    }
}
