use crate::config::AppConfig;
use crate::store::StoreError;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url().to_string(),
            ..Default::default()
        }
    }
}

/// Establishes a connection pool to the reading store
///
/// # Errors
/// Returns `StoreError::Connect` if the connection cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, StoreError> {
    debug!(
        max_connections = config.max_connections,
        "Configuring database connection"
    );

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    let pool = Database::connect(opt)
        .await
        .map_err(|source| StoreError::Connect {
            url: redact_url(&config.url),
            source,
        })?;

    info!(url = %redact_url(&config.url), "Database connection pool established");
    Ok(pool)
}

/// Establish DB pool using AppConfig
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, StoreError> {
    establish_connection_with_config(&DbConfig::from(cfg)).await
}

/// Hides the password part of a connection URL before it reaches logs.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{}://{}:***@{}", scheme, user, host)
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_password() {
        assert_eq!(
            redact_url("postgres://aqi:hunter2@db:5432/aqi"),
            "postgres://aqi:***@db:5432/aqi"
        );
        assert_eq!(
            redact_url("sqlite://aqi_readings.db?mode=rwc"),
            "sqlite://aqi_readings.db?mode=rwc"
        );
    }

    #[test]
    fn config_takes_url_from_app_config() {
        let mut app = AppConfig::default();
        app.database_url = "sqlite://other.db".into();
        let cfg = DbConfig::from(&app);
        assert_eq!(cfg.url, "sqlite://other.db");
        assert_eq!(cfg.max_connections, 5);
    }
}
