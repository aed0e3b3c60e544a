/*!
 * # Ingestion daemon
 *
 * Every tick fetches current weather and air quality for each configured city
 * concurrently. Each city's fetch runs through one circuit breaker shared by
 * all cities and is retried with jittered delays; valid readings go over a
 * bounded channel to a single writer task that appends them to the store.
 */

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::config::{CityConfig, IngestConfig};
use crate::middleware_helpers::{with_retry, RetryConfig};
use crate::store::{Reading, ReadingStore, StoreError};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub mod owm;

pub use owm::{validate_air_quality, validate_weather, AirQuality, OwmClient, WeatherData};

/// Capacity of the channel between fetchers and the writer
pub const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingest.api_key is not configured")]
    MissingApiKey,

    #[error("OpenWeatherMap request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenWeatherMap returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode OpenWeatherMap response: {0}")]
    Decode(String),

    #[error("no air quality data in response")]
    NoAirQualityData,

    #[error("received invalid data: {0}")]
    InvalidData(String),

    #[error("{0}")]
    CircuitOpen(String),

    #[error("failed to store reading: {0}")]
    Store(#[from] StoreError),

    #[error("reading channel closed")]
    ChannelClosed,
}

impl IngestError {
    /// Invalid payloads are not retried; the next tick fetches fresh data.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            IngestError::InvalidData(_) | IngestError::MissingApiKey | IngestError::ChannelClosed
        )
    }
}

impl From<CircuitBreakerError<IngestError>> for IngestError {
    fn from(err: CircuitBreakerError<IngestError>) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen(name) => {
                IngestError::CircuitOpen(format!("circuit breaker '{}' is open", name))
            }
            CircuitBreakerError::ServiceFailure(inner) => inner,
        }
    }
}

/// Fetches, validates and forwards readings for the configured cities
#[derive(Debug, Clone)]
pub struct Ingestor {
    client: OwmClient,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    cities: Vec<CityConfig>,
}

impl Ingestor {
    pub fn new(client: OwmClient, cfg: &IngestConfig) -> Self {
        Self {
            client,
            breaker: CircuitBreaker::new("openweathermap", CircuitBreakerConfig::from(cfg)),
            retry: RetryConfig::from(cfg),
            cities: cfg.cities.clone(),
        }
    }

    /// Builds the client from configuration; fails without an API key.
    pub fn from_config(cfg: &IngestConfig) -> Result<Self, IngestError> {
        let api_key = cfg
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(IngestError::MissingApiKey)?;
        let client = OwmClient::new(
            cfg.base_url.clone(),
            api_key,
            Duration::from_secs(cfg.api_timeout_secs),
        )?;
        Ok(Self::new(client, cfg))
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// One fetch attempt: both endpoints, then validation.
    pub async fn fetch_reading(&self, city: &CityConfig) -> Result<Reading, IngestError> {
        let (weather, air) = tokio::try_join!(
            self.client.fetch_weather(city),
            self.client.fetch_air_quality(city)
        )?;
        validate_weather(&weather)?;
        validate_air_quality(&air)?;

        Ok(Reading {
            city: city.name.clone(),
            timestamp: Utc::now(),
            aqi: air.aqi as f64,
            temperature: weather.temperature,
            humidity: weather.humidity,
            wind_speed: weather.wind_speed,
            lat: Some(city.lat),
            lon: Some(city.lon),
            conditions: Some(weather.conditions).filter(|c| !c.is_empty()),
            components: Some(air.components),
        })
    }

    /// Fetches one city through the breaker and the retry loop.
    pub async fn fetch_city(&self, city: &CityConfig) -> Result<Reading, IngestError> {
        let result = self
            .breaker
            .call(|| {
                with_retry(&self.retry, IngestError::is_retryable, |attempt| {
                    if attempt > 1 {
                        info!(
                            city = %city.name,
                            attempt,
                            max_attempts = self.retry.max_attempts,
                            "retrying OpenWeatherMap fetch"
                        );
                    }
                    self.fetch_reading(city)
                })
            })
            .await;
        result.map_err(IngestError::from)
    }

    /// Fetches every city concurrently and forwards valid readings.
    /// Returns the number of readings sent to the writer.
    pub async fn tick(&self, tx: &mpsc::Sender<Reading>) -> usize {
        let mut tasks = JoinSet::new();
        for city in self.cities.clone() {
            let ingestor = self.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                match ingestor.fetch_city(&city).await {
                    Ok(reading) => tx.send(reading).await.map_err(|_| IngestError::ChannelClosed),
                    Err(err) => {
                        match &err {
                            IngestError::CircuitOpen(_) => {
                                warn!(city = %city.name, "circuit open, skipping fetch")
                            }
                            _ => error!(city = %city.name, error = %err, "fetch failed"),
                        }
                        Err(err)
                    }
                }
            });
        }

        let mut sent = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => sent += 1,
                Ok(Err(_)) => {}
                Err(join_err) => error!(error = %join_err, "fetch task panicked"),
            }
        }
        sent
    }
}

/// Drains `rx` into the store until every sender is gone.
/// Insert failures are logged and do not stop the writer.
pub async fn run_writer(store: Arc<dyn ReadingStore>, mut rx: mpsc::Receiver<Reading>) -> usize {
    let mut stored = 0;
    while let Some(reading) = rx.recv().await {
        match store.insert(&reading).await {
            Ok(()) => {
                stored += 1;
                info!(
                    city = %reading.city,
                    timestamp = %reading.timestamp,
                    aqi = reading.aqi,
                    "reading stored"
                );
            }
            Err(err) => error!(city = %reading.city, error = %err, "failed to store reading"),
        }
    }
    info!(stored, "writer finished");
    stored
}

/// Runs the fetch loop every `interval` until `shutdown` resolves, then
/// lets the writer drain.
pub async fn run(
    ingestor: Ingestor,
    store: Arc<dyn ReadingStore>,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<(), IngestError> {
    store.ensure_collection().await?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let writer = tokio::spawn(run_writer(store, rx));

    info!(
        cities = ingestor.cities.len(),
        interval_secs = interval.as_secs(),
        "starting periodic ingestion"
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let sent = ingestor.tick(&tx).await;
                info!(sent, "ingestion tick complete");
            }
        }
    }

    drop(tx);
    if let Err(join_err) = writer.await {
        error!(error = %join_err, "writer task failed");
    }
    info!("ingestion stopped");
    Ok(())
}
