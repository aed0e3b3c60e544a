//! Serves the AQI status page.
//!
//! Run with: cargo run --bin aqi-dashboard

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use aqi_sentinel::{
    config::{self, ReadingSourceKind},
    dashboard::{self, DashboardState, PredictClient},
};

#[derive(Debug, Parser)]
#[command(name = "aqi-dashboard", about = "Serve the AQI status dashboard")]
struct Cli {
    /// Overrides the configured predict endpoint
    #[arg(long)]
    predict_url: Option<String>,

    /// Overrides the configured listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let predict_url = cli
        .predict_url
        .unwrap_or_else(|| cfg.dashboard.predict_url.clone());
    let client = PredictClient::new(predict_url.clone(), cfg.dashboard.request_timeout())
        .context("failed to build HTTP client")?;
    let source = dashboard::reading_source_from_config(&cfg)
        .await
        .context("failed to set up the reading source")?;

    let app = dashboard::dashboard_router(DashboardState::new(source, client));

    let port = cli.port.unwrap_or(cfg.dashboard.port);
    let addr: SocketAddr = format!("{}:{}", cfg.dashboard.host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.dashboard.host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        predict_url = %predict_url,
        store_backed = cfg.dashboard.reading_source == ReadingSourceKind::Store,
        "aqi-dashboard listening on http://{}/dashboard/aqi-status/",
        addr
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(aqi_sentinel::shutdown_signal())
        .await?;

    Ok(())
}
