/*!
 * # Dashboard
 *
 * `GET /dashboard/aqi-status/` takes the current reading from a
 * [`ReadingSource`], asks the serving process whether it is anomalous and
 * renders the answer as an HTML page. Failures of the outbound call are
 * rendered on the page, each class with its own message.
 */

use crate::config::{AppConfig, ReadingSourceKind};
use crate::handlers::predict::AnomalyPrediction;
use crate::middleware_helpers::REQUEST_ID_HEADER;
use crate::store::ReadingStore;
use async_trait::async_trait;
use axum::{extract::State, response::Html, routing::get, Router};
use chrono::{NaiveDateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

mod render;

pub use render::render_status_page;

/// Fixed values reported by the simulated source
pub const SIMULATED_AQI: f64 = 155.0;
pub const SIMULATED_TEMPERATURE: f64 = 35.0;
pub const SIMULATED_HUMIDITY: f64 = 70.0;
pub const SIMULATED_WIND_SPEED: f64 = 6.5;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Anomaly detection service not reachable. Ensure it's running. ({0})")]
    Unreachable(String),

    #[error("Anomaly detection service returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Invalid JSON response from anomaly detection service: {0}")]
    InvalidJson(String),

    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl DashboardError {
    /// Short machine-readable class name, used as a CSS class and in logs
    pub fn class(&self) -> &'static str {
        match self {
            DashboardError::Unreachable(_) => "unreachable",
            DashboardError::HttpStatus { .. } => "http-status",
            DashboardError::InvalidJson(_) => "invalid-json",
            DashboardError::Unexpected(_) => "unexpected",
        }
    }
}

/// The reading shown on the page and sent to the serving process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentReading {
    pub timestamp: String,
    pub aqi_value: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
}

#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn current(&self) -> Result<CurrentReading, DashboardError>;
}

/// Placeholder reading stamped with the current UTC time
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedSource;

#[async_trait]
impl ReadingSource for SimulatedSource {
    async fn current(&self) -> Result<CurrentReading, DashboardError> {
        Ok(CurrentReading {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            aqi_value: SIMULATED_AQI,
            temperature: SIMULATED_TEMPERATURE,
            humidity: SIMULATED_HUMIDITY,
            wind_speed: SIMULATED_WIND_SPEED,
        })
    }
}

/// Newest stored reading for one city
pub struct StoreSource {
    store: Arc<dyn ReadingStore>,
    city: String,
}

impl StoreSource {
    pub fn new(store: Arc<dyn ReadingStore>, city: impl Into<String>) -> Self {
        Self {
            store,
            city: city.into(),
        }
    }
}

#[async_trait]
impl ReadingSource for StoreSource {
    async fn current(&self) -> Result<CurrentReading, DashboardError> {
        let raw = self
            .store
            .latest_for_city(&self.city)
            .await
            .map_err(|e| DashboardError::Unexpected(format!("reading store: {}", e)))?
            .ok_or_else(|| {
                DashboardError::Unexpected(format!("no readings stored for {}", self.city))
            })?;

        let field = |name: &str, value: Option<f64>| {
            value.ok_or_else(|| {
                DashboardError::Unexpected(format!("latest reading has no usable {}", name))
            })
        };
        let timestamp: NaiveDateTime = raw.timestamp.to_naive_utc().ok_or_else(|| {
            DashboardError::Unexpected("latest reading has no usable timestamp".into())
        })?;

        Ok(CurrentReading {
            timestamp: format!("{}Z", timestamp.format("%Y-%m-%dT%H:%M:%S%.f")),
            aqi_value: field("aqi", raw.aqi.to_number())?,
            temperature: field("temperature", raw.regressor("temperature").to_number())?,
            humidity: field("humidity", raw.regressor("humidity").to_number())?,
            wind_speed: field("wind_speed", raw.regressor("wind_speed").to_number())?,
        })
    }
}

/// Client for the serving process's predict endpoint
#[derive(Debug, Clone)]
pub struct PredictClient {
    http: Client,
    url: String,
}

impl PredictClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub async fn check(&self, reading: &CurrentReading) -> Result<AnomalyPrediction, DashboardError> {
        let mut request = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(reading);
        if let Some(request_id) = crate::tracing::current_request_id() {
            request = request.header(REQUEST_ID_HEADER, request_id.as_str());
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            return Err(DashboardError::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| DashboardError::InvalidJson(e.to_string()))?;
        serde_json::from_value(value)
            .map_err(|e| DashboardError::Unexpected(format!("unexpected response shape: {}", e)))
    }
}

fn classify_transport_error(err: reqwest::Error) -> DashboardError {
    if err.is_connect() || err.is_timeout() {
        DashboardError::Unreachable(err.to_string())
    } else {
        DashboardError::Unexpected(err.to_string())
    }
}

/// Shared state of the dashboard process
#[derive(Clone)]
pub struct DashboardState {
    pub source: Arc<dyn ReadingSource>,
    pub client: PredictClient,
}

impl DashboardState {
    pub fn new(source: Arc<dyn ReadingSource>, client: PredictClient) -> Self {
        Self { source, client }
    }
}

/// Outcome of one status check, as rendered on the page
#[derive(Debug)]
pub struct StatusView {
    pub reading: Option<CurrentReading>,
    pub result: Result<AnomalyPrediction, DashboardError>,
}

/// Fetches the current reading and checks it against the serving process.
pub async fn check_current(state: &DashboardState) -> StatusView {
    let reading = match state.source.current().await {
        Ok(reading) => reading,
        Err(err) => {
            error!(error = %err, "failed to obtain current reading");
            return StatusView {
                reading: None,
                result: Err(err),
            };
        }
    };

    let result = state.client.check(&reading).await;
    match &result {
        Ok(prediction) => info!(
            timestamp = %reading.timestamp,
            actual = reading.aqi_value,
            is_anomaly = prediction.is_anomaly,
            lower = prediction.aqi_lower_bound,
            upper = prediction.aqi_upper_bound,
            deviation = prediction.deviation,
            "anomaly check complete"
        ),
        Err(err) => error!(class = err.class(), error = %err, "anomaly check failed"),
    }

    StatusView {
        reading: Some(reading),
        result,
    }
}

pub async fn aqi_status(State(state): State<DashboardState>) -> Html<String> {
    let view = check_current(&state).await;
    Html(render_status_page(&view))
}

pub fn dashboard_router(state: DashboardState) -> Router {
    Router::new()
        .route("/dashboard/aqi-status/", get(aqi_status))
        .with_state(state)
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            crate::middleware_helpers::request_id_middleware,
        ))
}

/// Builds the reading source selected in configuration.
pub async fn reading_source_from_config(
    cfg: &AppConfig,
) -> Result<Arc<dyn ReadingSource>, crate::store::StoreError> {
    match cfg.dashboard.reading_source {
        ReadingSourceKind::Simulated => Ok(Arc::new(SimulatedSource)),
        ReadingSourceKind::Store => {
            let db = crate::db::establish_connection_from_app_config(cfg).await?;
            let store = crate::store::SeaOrmReadingStore::new(db, cfg.collection());
            Ok(Arc::new(StoreSource::new(Arc::new(store), cfg.city.clone())))
        }
    }
}
