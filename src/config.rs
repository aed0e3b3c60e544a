use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8001;
const DEFAULT_DASHBOARD_PORT: u16 = 8000;
const CONFIG_DIR: &str = "config";
const DEFAULT_MODEL_PATH: &str = "aqi_model.json";
const DEFAULT_DATABASE_URL: &str = "sqlite://aqi_readings.db?mode=rwc";
const DEFAULT_COLLECTION: &str = "city_data";
const DEFAULT_CITY: &str = "Lahore";
const DEFAULT_PREDICT_URL: &str = "http://127.0.0.1:8001/predict_anomaly/";
const DEFAULT_OWM_BASE_URL: &str = "https://api.openweathermap.org";

/// Single-name environment variables honoured on top of the `AQI__*` ones.
/// Later entries win when more than one maps to the same key.
const LEGACY_ENV_ALIASES: [(&str, &str); 6] = [
    ("MODEL_SAVE_PATH", "model_path"),
    ("MODEL_PATH", "model_path"),
    ("DATABASE_URL", "database_url"),
    ("DB_NAME", "database_name"),
    ("COLLECTION_NAME", "collection_name"),
    ("CITY_FOCUS", "city"),
];

/// Forecasting model hyper-parameters
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ForecastSettings {
    /// Width of the predicted interval, e.g. 0.80 for an 80% interval
    #[serde(default = "default_interval_width")]
    #[validate(custom = "validate_interval_width")]
    pub interval_width: f64,

    /// Number of potential trend changepoints
    #[serde(default = "default_n_changepoints")]
    pub n_changepoints: usize,

    #[serde(default = "default_changepoint_prior_scale")]
    #[validate(custom = "validate_prior_scale")]
    pub changepoint_prior_scale: f64,

    #[serde(default = "default_seasonality_prior_scale")]
    #[validate(custom = "validate_prior_scale")]
    pub seasonality_prior_scale: f64,

    #[serde(default = "default_regressor_prior_scale")]
    #[validate(custom = "validate_prior_scale")]
    pub regressor_prior_scale: f64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            interval_width: default_interval_width(),
            n_changepoints: default_n_changepoints(),
            changepoint_prior_scale: default_changepoint_prior_scale(),
            seasonality_prior_scale: default_seasonality_prior_scale(),
            regressor_prior_scale: default_regressor_prior_scale(),
        }
    }
}

/// Where the dashboard gets its "current" reading from
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadingSourceKind {
    /// Fixed placeholder values stamped with the current time
    Simulated,
    /// Newest row stored for the configured city
    Store,
}

/// Dashboard process configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DashboardConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_dashboard_port")]
    pub port: u16,

    /// Full URL of the serving process's predict endpoint
    #[serde(default = "default_predict_url")]
    #[validate(url)]
    pub predict_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_reading_source")]
    pub reading_source: ReadingSourceKind,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_dashboard_port(),
            predict_url: default_predict_url(),
            request_timeout_secs: default_request_timeout_secs(),
            reading_source: default_reading_source(),
        }
    }
}

impl DashboardConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// A monitored city and its coordinates
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CityConfig {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl CityConfig {
    fn new(name: &str, lat: f64, lon: f64) -> Self {
        Self {
            name: name.to_string(),
            lat,
            lon,
        }
    }
}

/// Ingestion daemon configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    /// OpenWeatherMap API key; required only by the ingestion daemon
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_owm_base_url")]
    #[validate(url)]
    pub base_url: String,

    #[serde(default = "default_fetch_interval_secs")]
    #[validate(range(min = 1))]
    pub fetch_interval_secs: u64,

    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    #[validate(range(min = 1))]
    pub max_retries: u32,

    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,

    #[serde(default = "default_breaker_failure_threshold")]
    #[validate(range(min = 1))]
    pub breaker_failure_threshold: u32,

    #[serde(default = "default_breaker_timeout_secs")]
    pub breaker_timeout_secs: u64,

    #[serde(default = "default_cities")]
    pub cities: Vec<CityConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_owm_base_url(),
            fetch_interval_secs: default_fetch_interval_secs(),
            api_timeout_secs: default_api_timeout_secs(),
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_timeout_secs: default_breaker_timeout_secs(),
            cities: default_cities(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Location of the persisted forecasting model
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Reading store connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Optional schema qualifier for the readings table
    #[serde(default)]
    #[validate(custom = "validate_identifier")]
    pub database_name: Option<String>,

    /// Table holding the historical readings
    #[serde(default = "default_collection_name")]
    #[validate(custom = "validate_identifier")]
    pub collection_name: String,

    /// City whose readings the model is trained on
    #[serde(default = "default_city")]
    #[validate(length(min = 1))]
    pub city: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    #[validate]
    pub forecast: ForecastSettings,

    #[serde(default)]
    #[validate]
    pub dashboard: DashboardConfig,

    #[serde(default)]
    #[validate]
    pub ingest: IngestConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            database_url: default_database_url(),
            database_name: None,
            collection_name: default_collection_name(),
            city: default_city(),
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            forecast: ForecastSettings::default(),
            dashboard: DashboardConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Location of the readings table, schema-qualified when a database name is set
    pub fn collection(&self) -> crate::store::CollectionRef {
        crate::store::CollectionRef::new(self.database_name.clone(), self.collection_name.clone())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_dashboard_port() -> u16 {
    DEFAULT_DASHBOARD_PORT
}

fn default_model_path() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_PATH)
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_collection_name() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_city() -> String {
    DEFAULT_CITY.to_string()
}

fn default_interval_width() -> f64 {
    0.80
}

fn default_n_changepoints() -> usize {
    25
}

fn default_changepoint_prior_scale() -> f64 {
    0.05
}

fn default_seasonality_prior_scale() -> f64 {
    10.0
}

fn default_regressor_prior_scale() -> f64 {
    10.0
}

fn default_predict_url() -> String {
    DEFAULT_PREDICT_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_reading_source() -> ReadingSourceKind {
    ReadingSourceKind::Simulated
}

fn default_owm_base_url() -> String {
    DEFAULT_OWM_BASE_URL.to_string()
}

fn default_fetch_interval_secs() -> u64 {
    // six cities, weather + air pollution, stays under 1000 AQI calls per day
    9 * 60
}

fn default_api_timeout_secs() -> u64 {
    20
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    1000
}

fn default_max_jitter_ms() -> u64 {
    500
}

fn default_breaker_failure_threshold() -> u32 {
    3
}

fn default_breaker_timeout_secs() -> u64 {
    60
}

fn default_cities() -> Vec<CityConfig> {
    vec![
        CityConfig::new("Lahore", 31.5204, 74.3587),
        CityConfig::new("Sheikhupura", 31.7167, 74.0000),
        CityConfig::new("Kasur", 31.1167, 74.4500),
        CityConfig::new("Amritsar", 31.6333, 74.8333),
        CityConfig::new("Gujranwala", 32.1667, 74.1833),
        CityConfig::new("Sialkot", 32.4833, 74.5333),
    ]
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Table and schema names are spliced into SQL, so only plain identifiers pass.
fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("identifier");
        err.message = Some("Must start with a letter or '_' and contain only [A-Za-z0-9_]".into());
        Err(err)
    }
}

fn validate_interval_width(width: f64) -> Result<(), ValidationError> {
    if !width.is_finite() || width <= 0.0 || width >= 1.0 {
        let mut err = ValidationError::new("interval_width");
        err.message = Some("interval_width must be strictly between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_prior_scale(scale: f64) -> Result<(), ValidationError> {
    if !scale.is_finite() || scale <= 0.0 {
        let mut err = ValidationError::new("prior_scale");
        err.message = Some("prior scales must be finite and greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("aqi_sentinel={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (AQI__*)
/// 5. Single-name variables such as MODEL_PATH and CITY_FOCUS
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let mut builder = Config::builder()
        .set_default("environment", run_env.clone())?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(
            Environment::with_prefix("AQI")
                .separator("__")
                .try_parsing(true),
        );

    for (var, key) in LEGACY_ENV_ALIASES {
        builder = builder.set_override_option(key, env::var(var).ok())?;
    }

    let app_config: AppConfig = builder.build()?.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
