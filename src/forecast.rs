//! The forecast pipeline.
//!
//! A forecast resolves the algorithm, pulls the usage data it needs, hands that data to the
//! algorithm through exchange files and returns whatever the algorithm wrote as its result.

use crate::app_state::AppState;
use crate::error::ForecastError;
use crate::exchange::ExchangeFiles;
use crate::models::ForecastRequest;
use crate::planner;
use crate::upload::ParameterUpload;

use bytes::Bytes;
use tracing::{event, Level};

/// Run a forecast.
///
/// The exchange files are removed before this returns, whether or not the forecast succeeded.
///
/// # Arguments
///
/// * `state`: Shared application state
/// * `request`: Parsed forecast request
/// * `upload`: Optional parameter upload, passed to the algorithm verbatim
pub async fn run(
    state: &AppState,
    request: ForecastRequest,
    upload: ParameterUpload,
) -> Result<Bytes, ForecastError> {
    let algorithm = state.registry.resolve(&request.algorithm).await?;
    let bucket_width = algorithm.bucketing()?;

    let query = planner::plan(&request, bucket_width, state.store.as_ref()).await?;
    let usages = planner::run(&query, state.store.as_ref()).await?;

    let files = ExchangeFiles::new(&state.exchange_dir);
    files.write_input(&usages).await?;
    files.prepare().await?;
    if let Some(parameter) = upload.read().await? {
        files.write_parameter(&parameter).await?;
    }

    let _permit = state.resource_manager.process().await?;
    state.invoker.invoke(&algorithm, &files).await?;
    let output = files.read_output().await?;
    event!(
        Level::INFO,
        algorithm = algorithm.identifier.as_str(),
        rows = usages.len(),
        bytes = output.len(),
        "Forecast complete"
    );
    Ok(output)
}
