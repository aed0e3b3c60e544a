use std::net::SocketAddr;

use anyhow::Context;
use tracing::{error, info};

use aqi_sentinel as aqi;
use aqi_sentinel::forecast::{ModelSpec, SeasonalRegressionBackend};
use aqi_sentinel::registry::ModelRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = aqi::config::load_config().context("failed to load configuration")?;
    aqi::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Load the model before binding the listener.
    let backend = SeasonalRegressionBackend::new(ModelSpec::from(&cfg.forecast));
    let models = ModelRegistry::load(&backend, cfg.model_path()).map_err(|e| {
        error!(path = %cfg.model_path().display(), error = %e, "failed to load model");
        anyhow::Error::new(e).context("model could not be loaded")
    })?;

    let app = aqi::api_router(aqi::AppState::new(models));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("aqi-api listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(aqi::shutdown_signal())
        .await?;

    Ok(())
}
