//! Periodically fetches weather and air quality for the configured cities and
//! appends the readings to the store.
//!
//! Run with: AQI__INGEST__API_KEY=... cargo run --bin aqi-ingest

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use aqi_sentinel::{
    config, db,
    ingest::{self, Ingestor},
    store::{ReadingStore, SeaOrmReadingStore},
};

#[derive(Debug, Parser)]
#[command(name = "aqi-ingest", about = "Fetch city readings into the store")]
struct Cli {
    /// Seconds between fetch rounds; defaults to the configured interval
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Run a single round and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let ingestor = Ingestor::from_config(&cfg.ingest).context("failed to set up ingestion")?;
    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the reading store")?;
    let store: Arc<dyn ReadingStore> =
        Arc::new(SeaOrmReadingStore::new(pool, cfg.collection()));

    if cli.once {
        store
            .ensure_collection()
            .await
            .context("failed to prepare the reading collection")?;
        let (tx, rx) = tokio::sync::mpsc::channel(ingest::CHANNEL_CAPACITY);
        let writer = tokio::spawn(ingest::run_writer(store, rx));
        let sent = ingestor.tick(&tx).await;
        drop(tx);
        let stored = writer.await.context("writer task panicked")?;
        info!(sent, stored, "single ingestion round finished");
        return Ok(());
    }

    let interval = Duration::from_secs(cli.interval_secs.unwrap_or(cfg.ingest.fetch_interval_secs));
    ingest::run(ingestor, store, interval, aqi_sentinel::shutdown_signal())
        .await
        .context("ingestion stopped with an error")?;
    Ok(())
}
