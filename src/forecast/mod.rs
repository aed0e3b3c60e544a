/*!
 * # Forecasting
 *
 * The serving process and the retraining job only see the forecasting model
 * through two traits:
 *
 * - [`Forecaster`]: a fitted model that turns one timestamp plus regressor
 *   values into a point forecast and an interval.
 * - [`ForecastBackend`]: fits, saves and loads models of one concrete type.
 *
 * [`SeasonalRegressionBackend`] is the backend shipped with the crate.
 */

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod artifact;
pub mod seasonal;

pub use seasonal::{ModelSpec, SeasonalRegressionBackend, SeasonalRegressionModel};

/// Regressors every reading carries, in training-column order.
pub const REGRESSORS: [&str; 3] = ["temperature", "humidity", "wind_speed"];

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("need at least {required} rows to fit, got {rows}")]
    InsufficientData { rows: usize, required: usize },

    #[error("training data is not usable: {0}")]
    InvalidTrainingData(String),

    #[error("model settings are invalid: {0}")]
    InvalidSpec(String),

    #[error("normal equations are singular; the design matrix is rank deficient")]
    Singular,

    #[error("regressor '{0}' is missing from the input")]
    MissingRegressor(String),

    #[error("{0} is not finite")]
    NonFiniteInput(String),

    #[error("model produced a non-finite forecast")]
    NonFiniteForecast,

    #[error("I/O error on model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model artifact could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported model artifact: {0}")]
    UnsupportedArtifact(String),
}

impl ForecastError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ForecastError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One cleaned historical observation.
///
/// `regressors` is aligned with [`TrainingSeries::regressor_names`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub ds: NaiveDateTime,
    pub y: f64,
    pub regressors: Vec<f64>,
}

/// Cleaned, timestamp-ordered history for one city
#[derive(Debug, Clone, Default)]
pub struct TrainingSeries {
    regressor_names: Vec<String>,
    rows: Vec<TrainingRow>,
}

impl TrainingSeries {
    /// Builds a series, checking every row carries one value per regressor.
    pub fn new(
        regressor_names: Vec<String>,
        mut rows: Vec<TrainingRow>,
    ) -> Result<Self, ForecastError> {
        if let Some(bad) = rows
            .iter()
            .find(|row| row.regressors.len() != regressor_names.len())
        {
            return Err(ForecastError::InvalidTrainingData(format!(
                "row at {} has {} regressor values, expected {}",
                bad.ds,
                bad.regressors.len(),
                regressor_names.len()
            )));
        }
        rows.sort_by_key(|row| row.ds);
        Ok(Self {
            regressor_names,
            rows,
        })
    }

    pub fn regressor_names(&self) -> &[String] {
        &self.regressor_names
    }

    pub fn rows(&self) -> &[TrainingRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A single row to forecast: a naive timestamp plus regressor values by name
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastInput {
    pub ds: NaiveDateTime,
    pub regressors: BTreeMap<String, f64>,
}

impl ForecastInput {
    pub fn new(ds: NaiveDateTime) -> Self {
        Self {
            ds,
            regressors: BTreeMap::new(),
        }
    }

    pub fn with_regressor(mut self, name: impl Into<String>, value: f64) -> Self {
        self.regressors.insert(name.into(), value);
        self
    }

    pub fn regressor(&self, name: &str) -> Option<f64> {
        self.regressors.get(name).copied()
    }
}

/// Point forecast and interval for one row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

/// A fitted model able to forecast single rows.
pub trait Forecaster: Send + Sync {
    fn predict(&self, input: &ForecastInput) -> Result<Forecast, ForecastError>;
}

/// Fits, persists and restores one concrete kind of model.
pub trait ForecastBackend: Send + Sync {
    type Model: Forecaster + 'static;

    fn fit(&self, series: &TrainingSeries) -> Result<Self::Model, ForecastError>;

    /// Persists the model at `path`, replacing any previous artifact atomically.
    fn save(&self, model: &Self::Model, path: &Path) -> Result<(), ForecastError>;

    fn load(&self, path: &Path) -> Result<Self::Model, ForecastError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn series_sorts_rows() {
        let rows = vec![
            TrainingRow {
                ds: at(5),
                y: 2.0,
                regressors: vec![1.0],
            },
            TrainingRow {
                ds: at(1),
                y: 1.0,
                regressors: vec![1.0],
            },
        ];
        let series = TrainingSeries::new(vec!["temperature".into()], rows).unwrap();
        assert_eq!(series.rows()[0].ds, at(1));
        assert_eq!(series.rows()[1].ds, at(5));
    }

    #[test]
    fn series_rejects_misaligned_regressors() {
        let rows = vec![TrainingRow {
            ds: at(1),
            y: 1.0,
            regressors: vec![1.0, 2.0],
        }];
        let err = TrainingSeries::new(vec!["temperature".into()], rows).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidTrainingData(_)));
    }

    #[test]
    fn input_builder_collects_regressors() {
        let input = ForecastInput::new(at(3))
            .with_regressor("temperature", 31.0)
            .with_regressor("humidity", 40.0);
        assert_eq!(input.regressor("temperature"), Some(31.0));
        assert_eq!(input.regressor("wind_speed"), None);
    }
}
