//! HTTP API of the forecast server

use crate::app_state::{AppState, SharedAppState};
use crate::cli::CommandLineArgs;
use crate::error::ForecastError;
use crate::forecast;
use crate::metrics::{metrics_handler, record_response_metrics, request_counter};
use crate::models::{
    AlgorithmDescriptor, AlgorithmInformation, ForecastOutput, ForecastRequest, UsageType,
};
use crate::store::UsageStore;
use crate::upload::ParameterUpload;

use axum::{
    extract::{DefaultBodyLimit, Path, RawQuery, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower::Layer;
use tower::ServiceBuilder;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

impl IntoResponse for ForecastOutput {
    fn into_response(self) -> Response {
        (
            [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
            self.0,
        )
            .into_response()
    }
}

/// Returns a [axum::Router] for the forecast API.
///
/// The catalog lives at the root. Forecasts are served for both GET and POST, the latter
/// optionally carrying a multipart parameter upload.
///
/// # Arguments
///
/// * `args`: Command line arguments
/// * `state`: Shared application state
pub fn router(args: &CommandLineArgs, state: SharedAppState) -> Router {
    // Clamp the configured limit to the address space.
    let body_limit = usize::try_from(args.max_parameter_size.as_u64()).unwrap_or(usize::MAX);

    Router::new()
        .route("/", get(catalog))
        .route("/consumer-groups", get(consumer_groups))
        .route("/forecast", get(no_algorithm).post(no_algorithm))
        .route("/forecast/:algorithm", get(run_forecast).post(run_forecast))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .on_request(request_counter)
                    .on_response(record_response_metrics),
            ),
        )
        .with_state(state)
}

/// The complete service type.
///
/// Trailing slashes are trimmed before routing, so `/forecast/linreg/` reaches the same handler
/// as `/forecast/linreg`.
pub type Service = NormalizePath<Router>;

/// Returns a [crate::app::Service] for the forecast API.
///
/// # Arguments
///
/// * `args`: Command line arguments
/// * `store`: Usage data access shared by all requests
pub fn service(args: &CommandLineArgs, store: Arc<dyn UsageStore>) -> Service {
    let state = Arc::new(AppState::new(args, store));
    NormalizePathLayer::trim_trailing_slash().layer(router(args, state))
}

/// List the available algorithms with their metadata.
async fn catalog(
    State(state): State<SharedAppState>,
) -> Result<Json<Vec<AlgorithmInformation>>, ForecastError> {
    let algorithms = state.registry.list().await?;
    Ok(Json(
        algorithms
            .iter()
            .map(AlgorithmDescriptor::information)
            .collect(),
    ))
}

/// List the consumer groups usage data can be filtered by.
async fn consumer_groups(
    State(state): State<SharedAppState>,
) -> Result<Json<Vec<UsageType>>, ForecastError> {
    Ok(Json(state.store.usage_types().await?))
}

/// Forecast requests without an algorithm segment.
///
/// The municipality key is checked first, so the caller learns about a missing key before a
/// missing algorithm.
async fn no_algorithm(RawQuery(query): RawQuery) -> ForecastError {
    match ForecastRequest::parse("", query.as_deref()) {
        Err(err) => err,
        Ok(_) => ForecastError::NoAlgorithmSpecified,
    }
}

/// Run a forecast and return the algorithm's output.
async fn run_forecast(
    State(state): State<SharedAppState>,
    Path(algorithm): Path<String>,
    RawQuery(query): RawQuery,
    upload: ParameterUpload,
) -> Result<ForecastOutput, ForecastError> {
    let request = ForecastRequest::parse(&algorithm, query.as_deref())?;
    let span = tracing::info_span!("forecast", algorithm = request.algorithm.as_str());
    forecast::run(&state, request, upload)
        .instrument(span)
        .await
        .map(ForecastOutput)
}
