//! AQI Sentinel
//!
//! Air-quality anomaly alerts: a seasonal forecast model retrained from stored
//! readings, an HTTP API that flags readings outside the forecast interval, a
//! status dashboard and an ingestion worker that keeps the reading store fed.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod anomaly;
pub mod circuit_breaker;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod errors;
pub mod forecast;
pub mod handlers;
pub mod ingest;
pub mod middleware_helpers;
pub mod openapi;
pub mod registry;
pub mod retrain;
pub mod store;
pub mod tracing;

use axum::{
    routing::{get, post},
    Router,
};

pub use handlers::AppState;

/// Routes of the serving process, with request ids and HTTP tracing applied.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/predict_anomaly/",
            post(handlers::predict::predict_anomaly),
        )
        .route("/health/", get(handlers::health::health_check))
        .route("/openapi.json", get(openapi::openapi_json))
        .with_state(state)
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}

/// Resolves when the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            ::tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                ::tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    ::tracing::info!("shutdown signal received");
}
