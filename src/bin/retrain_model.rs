//! Retrains the forecast model from the stored reading history.
//!
//! Run with: cargo run --bin retrain-model -- [--city Lahore] [--model-path models/aqi_model.json]
//!
//! Exits non-zero when the history is empty, fitting fails or the artifact
//! cannot be written. In every failure case the existing artifact is left in
//! place.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use aqi_sentinel::{
    config, db,
    forecast::{ModelSpec, SeasonalRegressionBackend},
    retrain,
    store::{ReadingStore, SeaOrmReadingStore},
};

#[derive(Debug, Parser)]
#[command(name = "retrain-model", about = "Fit the AQI forecast model and save it")]
struct Cli {
    /// City whose history is used; defaults to the configured city
    #[arg(long)]
    city: Option<String>,

    /// Where the artifact is written; defaults to the configured model path
    #[arg(long)]
    model_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let city = cli.city.unwrap_or_else(|| cfg.city.clone());
    let model_path = cli
        .model_path
        .unwrap_or_else(|| cfg.model_path().to_path_buf());

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the reading store")?;
    let store: Arc<dyn ReadingStore> =
        Arc::new(SeaOrmReadingStore::new(pool, cfg.collection()));
    let backend = SeasonalRegressionBackend::new(ModelSpec::from(&cfg.forecast));

    match retrain::run(store.as_ref(), &backend, &city, &model_path).await {
        Ok(outcome) => {
            info!(
                city = %outcome.city,
                rows = outcome.rows,
                fetched = outcome.cleaning.fetched,
                dropped = outcome.cleaning.dropped,
                regressors = ?outcome.regressors,
                history_start = %outcome.history_start,
                history_end = %outcome.history_end,
                path = %outcome.model_path.display(),
                "retraining finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(city = %city, error = %e, "retraining failed; existing model left untouched");
            Err(e).context("retraining failed")
        }
    }
}
