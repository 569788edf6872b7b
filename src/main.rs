//! This file defines the usage-forecasts binary entry point.

use usage_forecasts::app;
use usage_forecasts::cli;
use usage_forecasts::metrics;
use usage_forecasts::server;
use usage_forecasts::store::PgUsageStore;
use usage_forecasts::tracing;

use std::process::exit;
use std::sync::Arc;
use ::tracing::{event, Level};

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    metrics::register_metrics();
    event!(
        Level::INFO,
        "Serving algorithms from {}",
        args.algorithm_dir.display()
    );
    let store = match PgUsageStore::connect(&args).await {
        Ok(store) => store,
        Err(err) => {
            event!(Level::ERROR, "Failed to connect to the usage database: {}", err);
            exit(1)
        }
    };
    let service = app::service(&args, Arc::new(store));
    server::serve(&args, service).await;
}
