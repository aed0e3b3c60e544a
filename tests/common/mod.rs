#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use aqi_sentinel::forecast::{Forecast, ForecastError, ForecastInput, Forecaster};
use aqi_sentinel::registry::ModelRegistry;
use aqi_sentinel::AppState;
use aqi_sentinel::store::{FieldValue, RawReading, Reading, ReadingStore, StoreError};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tower::ServiceExt;

/// Forecaster returning a fixed interval and recording every input it saw
#[derive(Default)]
pub struct StubForecaster {
    pub forecast: Option<Forecast>,
    pub seen: Mutex<Vec<ForecastInput>>,
}

impl StubForecaster {
    pub fn fixed(yhat: f64, lower: f64, upper: f64) -> Self {
        Self {
            forecast: Some(Forecast {
                yhat,
                yhat_lower: lower,
                yhat_upper: upper,
            }),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// A forecaster whose every prediction fails
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn last_input(&self) -> Option<ForecastInput> {
        self.seen.lock().unwrap().last().cloned()
    }
}

impl Forecaster for StubForecaster {
    fn predict(&self, input: &ForecastInput) -> Result<Forecast, ForecastError> {
        self.seen.lock().unwrap().push(input.clone());
        self.forecast.ok_or(ForecastError::NonFiniteForecast)
    }
}

/// Builds a serving router around `model`
pub fn router_with(model: Arc<StubForecaster>) -> Router {
    let models = ModelRegistry::with_model(model);
    aqi_sentinel::api_router(AppState::new(models))
}

pub fn router_without_model() -> Router {
    aqi_sentinel::api_router(AppState::new(ModelRegistry::empty()))
}

/// Sends one request through `router` and returns status, headers and the
/// JSON body (`Value::Null` when the body is empty or not JSON).
pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, HeaderMap, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(text) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(text.to_string())
        }
        None => Body::empty(),
    };
    let request = builder.body(body).unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, json)
}

pub fn hourly(start: NaiveDateTime, hours: i64) -> impl Iterator<Item = NaiveDateTime> {
    (0..hours).map(move |h| start + Duration::hours(h))
}

pub fn june_first() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub fn raw_reading(ts: NaiveDateTime, aqi: f64, temperature: f64, humidity: f64, wind: f64) -> RawReading {
    RawReading {
        timestamp: FieldValue::NaiveDateTime(ts),
        aqi: FieldValue::Float(aqi),
        regressors: BTreeMap::from([
            ("temperature".to_string(), FieldValue::Float(temperature)),
            ("humidity".to_string(), FieldValue::Float(humidity)),
            ("wind_speed".to_string(), FieldValue::Float(wind)),
        ]),
    }
}

/// In-memory reading store keyed by city
#[derive(Default)]
pub struct MemoryStore {
    pub rows: Mutex<BTreeMap<String, Vec<RawReading>>>,
    pub inserted: Mutex<Vec<Reading>>,
    pub fail: bool,
}

impl MemoryStore {
    pub fn with_rows(city: &str, rows: Vec<RawReading>) -> Self {
        let store = Self::default();
        store.rows.lock().unwrap().insert(city.to_string(), rows);
        store
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Database(sea_orm::DbErr::Custom(
                "store offline".into(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn fetch_city(&self, city: &str) -> Result<Vec<RawReading>, StoreError> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(city)
            .cloned()
            .unwrap_or_default())
    }

    async fn latest_for_city(&self, city: &str) -> Result<Option<RawReading>, StoreError> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(city)
            .and_then(|rows| rows.last().cloned()))
    }

    async fn insert(&self, reading: &Reading) -> Result<(), StoreError> {
        self.check()?;
        self.inserted.lock().unwrap().push(reading.clone());
        Ok(())
    }

    async fn ensure_collection(&self) -> Result<(), StoreError> {
        self.check()
    }
}
