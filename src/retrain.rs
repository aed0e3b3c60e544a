/*!
 * # Retraining pipeline
 *
 * load → clean → fit → persist. The persisted model is only replaced once a
 * new model has been fitted and fully written; any earlier failure leaves the
 * previous artifact in place for the serving process.
 */

use crate::forecast::{ForecastBackend, ForecastError, TrainingRow, TrainingSeries, REGRESSORS};
use crate::store::{RawReading, ReadingStore, StoreError};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RetrainError {
    #[error("failed to load readings for '{city}': {source}")]
    Store {
        city: String,
        #[source]
        source: StoreError,
    },

    #[error("no usable readings for city '{city}'")]
    NoData { city: String },

    #[error("model fit failed: {0}")]
    Fit(#[source] ForecastError),

    #[error("failed to persist model to {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: ForecastError,
    },
}

/// What cleaning did to the fetched rows
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleaningReport {
    pub fetched: usize,
    pub dropped: usize,
    /// Regressors with no value in any row
    pub skipped_regressors: Vec<String>,
}

/// Coerces raw rows into a training series.
///
/// Regressors absent from every row are left out of the series. Rows missing
/// the timestamp, the AQI or any remaining regressor are dropped.
pub fn prepare_series(raw: &[RawReading]) -> Result<(TrainingSeries, CleaningReport), ForecastError> {
    let (present, skipped): (Vec<&str>, Vec<&str>) = REGRESSORS
        .iter()
        .copied()
        .partition(|name| raw.iter().any(|row| !row.regressor(name).is_null()));

    for name in &skipped {
        warn!(regressor = name, "regressor missing from every row, fitting without it");
    }

    let rows: Vec<TrainingRow> = raw
        .iter()
        .filter_map(|row| {
            let ds = row.timestamp.to_naive_utc()?;
            let y = row.aqi.to_number()?;
            let regressors = present
                .iter()
                .map(|name| row.regressor(name).to_number())
                .collect::<Option<Vec<_>>>()?;
            Some(TrainingRow { ds, y, regressors })
        })
        .collect();

    let report = CleaningReport {
        fetched: raw.len(),
        dropped: raw.len() - rows.len(),
        skipped_regressors: skipped.iter().map(|s| s.to_string()).collect(),
    };
    if report.dropped > 0 {
        warn!(
            dropped = report.dropped,
            fetched = report.fetched,
            "dropped rows with missing or unparseable values"
        );
    }

    let series = TrainingSeries::new(present.iter().map(|s| s.to_string()).collect(), rows)?;
    Ok((series, report))
}

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct RetrainOutcome {
    pub city: String,
    pub rows: usize,
    pub regressors: Vec<String>,
    pub cleaning: CleaningReport,
    pub history_start: NaiveDateTime,
    pub history_end: NaiveDateTime,
    pub model_path: PathBuf,
}

/// Runs one retraining pass for `city` and atomically replaces the model at
/// `model_path`.
pub async fn run<B: ForecastBackend>(
    store: &dyn ReadingStore,
    backend: &B,
    city: &str,
    model_path: &Path,
) -> Result<RetrainOutcome, RetrainError> {
    info!(city, "starting retraining");

    let raw = store
        .fetch_city(city)
        .await
        .map_err(|source| RetrainError::Store {
            city: city.to_string(),
            source,
        })?;

    let (series, cleaning) = prepare_series(&raw).map_err(RetrainError::Fit)?;
    let (history_start, history_end) = match (series.rows().first(), series.rows().last()) {
        (Some(first), Some(last)) => (first.ds, last.ds),
        _ => {
            return Err(RetrainError::NoData {
                city: city.to_string(),
            })
        }
    };
    info!(
        rows = series.len(),
        regressors = ?series.regressor_names(),
        %history_start,
        %history_end,
        "training series prepared"
    );

    let model = backend.fit(&series).map_err(RetrainError::Fit)?;

    backend
        .save(&model, model_path)
        .map_err(|source| RetrainError::Persist {
            path: model_path.to_path_buf(),
            source,
        })?;
    info!(path = %model_path.display(), "model saved");

    Ok(RetrainOutcome {
        city: city.to_string(),
        rows: series.len(),
        regressors: series.regressor_names().to_vec(),
        cleaning,
        history_start,
        history_end,
        model_path: model_path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValue;
    use std::collections::BTreeMap;

    fn raw(ts: &str, aqi: FieldValue, temperature: FieldValue, humidity: FieldValue) -> RawReading {
        RawReading {
            timestamp: FieldValue::from(ts),
            aqi,
            regressors: BTreeMap::from([
                ("temperature".to_string(), temperature),
                ("humidity".to_string(), humidity),
                ("wind_speed".to_string(), FieldValue::Null),
            ]),
        }
    }

    #[test]
    fn drops_incomplete_rows_and_sorts() {
        let rows = vec![
            raw("2024-01-01T03:00:00", 4.0.into(), 20.0.into(), 50.0.into()),
            raw("2024-01-01T01:00:00", "3".into(), "19.5".into(), 55.0.into()),
            raw("not a date", 3.0.into(), 20.0.into(), 50.0.into()),
            raw("2024-01-01T02:00:00", FieldValue::Null, 20.0.into(), 50.0.into()),
            raw("2024-01-01T04:00:00", 5.0.into(), "hot".into(), 50.0.into()),
        ];

        let (series, report) = prepare_series(&rows).unwrap();
        assert_eq!(report.fetched, 5);
        assert_eq!(report.dropped, 3);
        assert_eq!(report.skipped_regressors, vec!["wind_speed"]);
        assert_eq!(series.regressor_names(), ["temperature", "humidity"]);

        let ys: Vec<f64> = series.rows().iter().map(|r| r.y).collect();
        assert_eq!(ys, vec![3.0, 4.0]);
        assert_eq!(series.rows()[0].regressors, vec![19.5, 55.0]);
    }

    #[test]
    fn cleaning_is_idempotent() {
        let rows = vec![
            raw("2024-01-01T02:00:00", 4.0.into(), 20.0.into(), 50.0.into()),
            raw("2024-01-01T01:00:00", 3.0.into(), 21.0.into(), 51.0.into()),
        ];
        let (first, _) = prepare_series(&rows).unwrap();

        let again: Vec<RawReading> = first
            .rows()
            .iter()
            .map(|r| RawReading {
                timestamp: FieldValue::NaiveDateTime(r.ds),
                aqi: r.y.into(),
                regressors: BTreeMap::from([
                    ("temperature".to_string(), r.regressors[0].into()),
                    ("humidity".to_string(), r.regressors[1].into()),
                ]),
            })
            .collect();
        let (second, report) = prepare_series(&again).unwrap();
        assert_eq!(first.rows(), second.rows());
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn empty_input_gives_empty_series() {
        let (series, report) = prepare_series(&[]).unwrap();
        assert!(series.is_empty());
        assert_eq!(report.skipped_regressors.len(), 3);
    }
}
