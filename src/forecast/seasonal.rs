/*!
 * # Seasonal regression backend
 *
 * Additive model in the style of Prophet:
 *
 * ```text
 * y(t) = trend(t) + Σ seasonality_k(t) + Σ β_r · regressor_r + ε
 * ```
 *
 * - trend: intercept, slope and hinge terms at changepoints spread over the
 *   first part of the history. Past the end of the history the trend is
 *   damped, so it levels off instead of extrapolating linearly forever.
 * - seasonality: Fourier series (yearly, weekly, daily). A component is only
 *   fitted once the history spans two of its periods.
 * - regressors: standardized by their training mean and standard deviation
 *
 * Coefficients are the MAP estimate under Gaussian priors, i.e. penalized
 * least squares solved through a Cholesky factorization of the normal
 * equations. The interval combines residual noise, coefficient uncertainty
 * (the posterior covariance) and the trend changes the future may bring.
 */

use super::artifact::{read_json, write_json_atomically};
use super::{
    Forecast, ForecastBackend, ForecastError, ForecastInput, Forecaster, TrainingSeries,
};
use crate::config::ForecastSettings;
use chrono::NaiveDateTime;
use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;
use std::path::Path;
use tracing::{debug, info};

const MS_PER_DAY: f64 = 86_400_000.0;
const MIN_ROWS: usize = 2;
const CHANGEPOINT_RANGE: f64 = 0.8;
/// Prior scale of the intercept and base slope, on the scaled target
const TREND_PRIOR_SCALE: f64 = 5.0;
/// Periods of a seasonality the history must cover before it is fitted
const MIN_PERIODS_COVERED: f64 = 2.0;
/// Extra trend time, in history spans, the forecast can ever reach
const TREND_DAMPING: f64 = 0.25;
const INITIAL_NOISE_VARIANCE: f64 = 0.01;
const MIN_NOISE_VARIANCE: f64 = 1e-12;
const REFIT_PASSES: usize = 2;
const MAX_JITTER_ATTEMPTS: usize = 7;

const ARTIFACT_FORMAT: &str = "aqi-sentinel/seasonal-regression";
const ARTIFACT_VERSION: u32 = 2;

/// One Fourier seasonality component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seasonality {
    pub name: String,
    pub period_days: f64,
    pub fourier_order: usize,
}

impl Seasonality {
    pub fn yearly() -> Self {
        Self::new("yearly", 365.25, 10)
    }

    pub fn weekly() -> Self {
        Self::new("weekly", 7.0, 3)
    }

    pub fn daily() -> Self {
        Self::new("daily", 1.0, 4)
    }

    fn new(name: &str, period_days: f64, fourier_order: usize) -> Self {
        Self {
            name: name.to_string(),
            period_days,
            fourier_order,
        }
    }

    fn width(&self) -> usize {
        2 * self.fourier_order
    }
}

/// Model structure and priors used when fitting.
///
/// The seasonality flags enable a component; it is still skipped when the
/// history is too short to tell it apart from the trend.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub yearly_seasonality: bool,
    pub weekly_seasonality: bool,
    pub daily_seasonality: bool,
    pub n_changepoints: usize,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub regressor_prior_scale: f64,
    pub interval_width: f64,
}

impl From<&ForecastSettings> for ModelSpec {
    fn from(settings: &ForecastSettings) -> Self {
        Self {
            yearly_seasonality: true,
            weekly_seasonality: true,
            daily_seasonality: true,
            n_changepoints: settings.n_changepoints,
            changepoint_prior_scale: settings.changepoint_prior_scale,
            seasonality_prior_scale: settings.seasonality_prior_scale,
            regressor_prior_scale: settings.regressor_prior_scale,
            interval_width: settings.interval_width,
        }
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec::from(&ForecastSettings::default())
    }
}

impl ModelSpec {
    fn seasonalities(&self) -> Vec<Seasonality> {
        let mut out = Vec::new();
        if self.yearly_seasonality {
            out.push(Seasonality::yearly());
        }
        if self.weekly_seasonality {
            out.push(Seasonality::weekly());
        }
        if self.daily_seasonality {
            out.push(Seasonality::daily());
        }
        out
    }

    /// Standard normal quantile matching the interval width
    fn interval_z(&self) -> Result<f64, ForecastError> {
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(ForecastError::InvalidSpec(format!(
                "interval width {} must lie strictly between 0 and 1",
                self.interval_width
            )));
        }
        let normal =
            Normal::new(0.0, 1.0).map_err(|e| ForecastError::InvalidSpec(e.to_string()))?;
        Ok(normal.inverse_cdf(0.5 + self.interval_width / 2.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegressorScaling {
    name: String,
    mu: f64,
    std: f64,
}

/// Everything needed to turn a timestamp and raw regressor values into a
/// feature row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Layout {
    start: NaiveDateTime,
    t_scale_days: f64,
    /// Scaled time of the last training row
    trend_end_t: f64,
    y_scale: f64,
    changepoints_t: Vec<f64>,
    seasonalities: Vec<Seasonality>,
    regressors: Vec<RegressorScaling>,
}

impl Layout {
    fn width(&self) -> usize {
        2 + self.changepoints_t.len()
            + self.seasonalities.iter().map(Seasonality::width).sum::<usize>()
            + self.regressors.len()
    }

    fn scaled_time(&self, ds: NaiveDateTime) -> f64 {
        (ds - self.start).num_milliseconds() as f64 / MS_PER_DAY / self.t_scale_days
    }

    /// Time seen by the trend terms: linear inside the history, then
    /// approaching `trend_end_t + TREND_DAMPING` exponentially.
    fn trend_time(&self, t: f64) -> f64 {
        let past_end = t - self.trend_end_t;
        if past_end <= 0.0 {
            t
        } else {
            self.trend_end_t + TREND_DAMPING * (1.0 - (-past_end / TREND_DAMPING).exp())
        }
    }

    fn features(&self, ds: NaiveDateTime, regressor_values: &[f64]) -> Vec<f64> {
        let t = self.trend_time(self.scaled_time(ds));
        let mut row = Vec::with_capacity(self.width());
        row.push(1.0);
        row.push(t);
        row.extend(self.changepoints_t.iter().map(|cp| (t - cp).max(0.0)));

        let epoch_days = ds.and_utc().timestamp_millis() as f64 / MS_PER_DAY;
        for seasonality in &self.seasonalities {
            for k in 1..=seasonality.fourier_order {
                let angle = 2.0 * PI * k as f64 * epoch_days / seasonality.period_days;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }

        row.extend(
            self.regressors
                .iter()
                .zip(regressor_values)
                .map(|(scaling, value)| (value - scaling.mu) / scaling.std),
        );
        row
    }

    /// Prior precision per column, relative to the observation noise.
    fn penalties(&self, spec: &ModelSpec, noise_variance: f64) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.width());
        let trend = noise_variance / TREND_PRIOR_SCALE.powi(2);
        out.extend([trend, trend]);
        let changepoint = noise_variance / spec.changepoint_prior_scale.powi(2);
        out.extend(std::iter::repeat(changepoint).take(self.changepoints_t.len()));
        let seasonal = noise_variance / spec.seasonality_prior_scale.powi(2);
        let seasonal_width = self.seasonalities.iter().map(Seasonality::width).sum();
        out.extend(std::iter::repeat(seasonal).take(seasonal_width));
        let regressor = noise_variance / spec.regressor_prior_scale.powi(2);
        out.extend(std::iter::repeat(regressor).take(self.regressors.len()));
        out
    }
}

/// A fitted seasonal regression model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalRegressionModel {
    layout: Layout,
    coefficients: DVector<f64>,
    /// Inverse of the penalized normal matrix; times `sigma²` it is the
    /// posterior covariance of the coefficients
    precision_inverse: DMatrix<f64>,
    /// Residual standard deviation on the scaled target
    sigma: f64,
    /// Mean absolute changepoint rate change, drives trend uncertainty
    mean_abs_delta: f64,
    z: f64,
    history_rows: usize,
}

impl SeasonalRegressionModel {
    pub fn regressor_names(&self) -> Vec<&str> {
        self.layout
            .regressors
            .iter()
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Seasonal components that were actually fitted
    pub fn seasonality_names(&self) -> Vec<&str> {
        self.layout
            .seasonalities
            .iter()
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn history_rows(&self) -> usize {
        self.history_rows
    }

    pub fn changepoint_count(&self) -> usize {
        self.layout.changepoints_t.len()
    }
}

impl Forecaster for SeasonalRegressionModel {
    fn predict(&self, input: &ForecastInput) -> Result<Forecast, ForecastError> {
        let values = self
            .layout
            .regressors
            .iter()
            .map(|scaling| {
                let value = input
                    .regressor(&scaling.name)
                    .ok_or_else(|| ForecastError::MissingRegressor(scaling.name.clone()))?;
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(ForecastError::NonFiniteInput(format!(
                        "regressor '{}'",
                        scaling.name
                    )))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let x = DVector::from_vec(self.layout.features(input.ds, &values));
        let yhat_scaled = x.dot(&self.coefficients);
        let leverage = (&self.precision_inverse * &x).dot(&x).max(0.0);

        // future changepoints arrive at the historical rate with the historical
        // mean magnitude; their variance grows with the cube of the horizon
        let t = self.layout.scaled_time(input.ds);
        let horizon = (self.layout.trend_time(t) - self.layout.trend_end_t).max(0.0);
        let rate = self.layout.changepoints_t.len() as f64;
        let trend_sd = self.mean_abs_delta * (2.0 * rate * horizon.powi(3) / 3.0).sqrt();
        let sd = (self.sigma.powi(2) * (1.0 + leverage) + trend_sd.powi(2)).sqrt();

        let yhat = yhat_scaled * self.layout.y_scale;
        let half_width = self.z * sd * self.layout.y_scale;
        if !yhat.is_finite() || !half_width.is_finite() {
            return Err(ForecastError::NonFiniteForecast);
        }

        Ok(Forecast {
            yhat,
            yhat_lower: yhat - half_width,
            yhat_upper: yhat + half_width,
        })
    }
}

#[derive(Serialize)]
struct ArtifactRef<'a> {
    format: &'a str,
    version: u32,
    model: &'a SeasonalRegressionModel,
}

#[derive(Deserialize)]
struct Artifact {
    format: String,
    version: u32,
    model: SeasonalRegressionModel,
}

/// Backend fitting [`SeasonalRegressionModel`]s
#[derive(Debug, Clone, Default)]
pub struct SeasonalRegressionBackend {
    spec: ModelSpec,
}

impl SeasonalRegressionBackend {
    pub fn new(spec: ModelSpec) -> Self {
        Self { spec }
    }

    fn layout_for(&self, series: &TrainingSeries) -> Layout {
        let rows = series.rows();
        let start = rows[0].ds;
        let end = rows[rows.len() - 1].ds;
        let span_days = (end - start).num_milliseconds() as f64 / MS_PER_DAY;
        let t_scale_days = if span_days > 0.0 { span_days } else { 1.0 };

        let y_scale = rows.iter().map(|r| r.y.abs()).fold(0.0, f64::max);
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };

        let n = rows.len() as f64;
        let regressors = series
            .regressor_names()
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let mu = rows.iter().map(|r| r.regressors[j]).sum::<f64>() / n;
                let var = rows
                    .iter()
                    .map(|r| (r.regressors[j] - mu).powi(2))
                    .sum::<f64>()
                    / (n - 1.0);
                let std = var.sqrt();
                RegressorScaling {
                    name: name.clone(),
                    mu,
                    std: if std > 0.0 && std.is_finite() { std } else { 1.0 },
                }
            })
            .collect();

        let (seasonalities, skipped): (Vec<_>, Vec<_>) = self
            .spec
            .seasonalities()
            .into_iter()
            .partition(|s| span_days >= MIN_PERIODS_COVERED * s.period_days);
        for seasonality in &skipped {
            info!(
                seasonality = %seasonality.name,
                span_days,
                "history shorter than two periods, seasonality not fitted"
            );
        }

        let mut layout = Layout {
            start,
            t_scale_days,
            trend_end_t: 0.0,
            y_scale,
            changepoints_t: Vec::new(),
            seasonalities,
            regressors,
        };
        layout.trend_end_t = layout.scaled_time(end);

        // evenly spaced over the first CHANGEPOINT_RANGE of the rows
        let hist_size = (rows.len() as f64 * CHANGEPOINT_RANGE).floor() as usize;
        let n_changepoints = self.spec.n_changepoints.min(hist_size.saturating_sub(1));
        layout.changepoints_t = (1..=n_changepoints)
            .map(|i| {
                let idx = (i as f64 * (hist_size - 1) as f64 / n_changepoints as f64).round();
                layout.scaled_time(rows[idx as usize].ds)
            })
            .collect();

        layout
    }
}

type Solution = (DVector<f64>, Cholesky<f64, Dyn>);

fn try_solve(a: DMatrix<f64>, b: &DVector<f64>) -> Option<Solution> {
    let cholesky = a.cholesky()?;
    let x = cholesky.solve(b);
    x.iter().all(|v| v.is_finite()).then_some((x, cholesky))
}

/// Solves the normal equations, adding diagonal jitter when rounding makes
/// the system numerically indefinite.
fn solve_with_jitter(a: DMatrix<f64>, b: &DVector<f64>) -> Result<Solution, ForecastError> {
    if let Some(solution) = try_solve(a.clone(), b) {
        return Ok(solution);
    }
    let mean_diag = a.diagonal().mean();
    let mut jitter = mean_diag.abs().max(1.0) * 1e-10;
    for _ in 0..MAX_JITTER_ATTEMPTS {
        let mut jittered = a.clone();
        for i in 0..jittered.nrows() {
            jittered[(i, i)] += jitter;
        }
        if let Some(solution) = try_solve(jittered, b) {
            debug!(jitter, "normal equations solved with diagonal jitter");
            return Ok(solution);
        }
        jitter *= 10.0;
    }
    Err(ForecastError::Singular)
}

impl ForecastBackend for SeasonalRegressionBackend {
    type Model = SeasonalRegressionModel;

    fn fit(&self, series: &TrainingSeries) -> Result<SeasonalRegressionModel, ForecastError> {
        let rows = series.rows();
        if rows.len() < MIN_ROWS {
            return Err(ForecastError::InsufficientData {
                rows: rows.len(),
                required: MIN_ROWS,
            });
        }
        if let Some(bad) = rows
            .iter()
            .find(|r| !r.y.is_finite() || r.regressors.iter().any(|v| !v.is_finite()))
        {
            return Err(ForecastError::InvalidTrainingData(format!(
                "non-finite value in row at {}",
                bad.ds
            )));
        }
        let z = self.spec.interval_z()?;

        let layout = self.layout_for(series);
        let p = layout.width();
        let n = rows.len();

        let x = DMatrix::from_row_iterator(
            n,
            p,
            rows.iter()
                .flat_map(|row| layout.features(row.ds, &row.regressors)),
        );
        let y = DVector::from_iterator(n, rows.iter().map(|row| row.y / layout.y_scale));
        let xtx = x.tr_mul(&x);
        let xty = x.tr_mul(&y);

        let solve = |noise_variance: f64| {
            let mut a = xtx.clone();
            let penalties = layout.penalties(&self.spec, noise_variance);
            for (i, penalty) in penalties.into_iter().enumerate() {
                a[(i, i)] += penalty;
            }
            solve_with_jitter(a, &xty)
        };
        let residual_variance = |coefficients: &DVector<f64>| {
            (&y - &x * coefficients).norm_squared() / n as f64
        };

        let (mut coefficients, mut cholesky) = solve(INITIAL_NOISE_VARIANCE)?;
        let mut ssr_mean = residual_variance(&coefficients);
        for _ in 1..REFIT_PASSES {
            (coefficients, cholesky) = solve(ssr_mean.max(MIN_NOISE_VARIANCE))?;
            ssr_mean = residual_variance(&coefficients);
        }

        let n_changepoints = layout.changepoints_t.len();
        let mean_abs_delta = if n_changepoints > 0 {
            coefficients.rows(2, n_changepoints).abs().mean()
        } else {
            0.0
        };

        let model = SeasonalRegressionModel {
            precision_inverse: cholesky.inverse(),
            sigma: ssr_mean.sqrt(),
            mean_abs_delta,
            z,
            history_rows: n,
            layout,
            coefficients,
        };

        info!(
            rows = model.history_rows,
            changepoints = n_changepoints,
            seasonalities = ?model.seasonality_names(),
            features = p,
            residual_sd = model.sigma * model.layout.y_scale,
            "seasonal regression fitted"
        );
        Ok(model)
    }

    fn save(&self, model: &SeasonalRegressionModel, path: &Path) -> Result<(), ForecastError> {
        write_json_atomically(
            path,
            &ArtifactRef {
                format: ARTIFACT_FORMAT,
                version: ARTIFACT_VERSION,
                model,
            },
        )
    }

    fn load(&self, path: &Path) -> Result<SeasonalRegressionModel, ForecastError> {
        let artifact: Artifact = read_json(path)?;
        if artifact.format != ARTIFACT_FORMAT {
            return Err(ForecastError::UnsupportedArtifact(format!(
                "format '{}'",
                artifact.format
            )));
        }
        if artifact.version != ARTIFACT_VERSION {
            return Err(ForecastError::UnsupportedArtifact(format!(
                "version {} (expected {})",
                artifact.version, ARTIFACT_VERSION
            )));
        }
        let model = artifact.model;
        let p = model.layout.width();
        if model.coefficients.len() != p || model.precision_inverse.shape() != (p, p) {
            return Err(ForecastError::UnsupportedArtifact(
                "coefficient count does not match the model layout".into(),
            ));
        }
        Ok(model)
    }
}
