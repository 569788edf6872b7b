//! Error handling.

use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::PathBuf;
use strum_macros::IntoStaticStr;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

/// Content type of error responses.
const PROBLEM_JSON: &str = "application/problem+json";

/// Prefix of the `type` member of problem details.
const PROBLEM_TYPE_PREFIX: &str = "urn:usage-forecasts:error:";

/// Forecast server error type
///
/// This type encapsulates the various errors that may occur while serving the catalog or running
/// a forecast. Each variant may result in a different API error response. The variant name in
/// SCREAMING_SNAKE_CASE is the stable error code reported to callers.
#[derive(Debug, Error, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ForecastError {
    /// The algorithm process exited unsuccessfully
    #[error("algorithm {identifier} exited unsuccessfully ({status})")]
    AlgorithmFailed {
        identifier: String,
        status: String,
        stderr: String,
    },

    /// The algorithm process could not be started
    #[error("failed to start algorithm {identifier}")]
    AlgorithmSpawn {
        identifier: String,
        #[source]
        source: std::io::Error,
    },

    /// The algorithm process exceeded the configured run time
    #[error("algorithm {identifier} did not finish within {seconds} seconds")]
    AlgorithmTimeout { identifier: String, seconds: u64 },

    /// Error listing the algorithm directory
    #[error("failed to read algorithm directory {}", path.display())]
    AlgorithmDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error querying the usage database
    #[error("error querying the usage database")]
    Database(#[from] sqlx::Error),

    /// Error encoding usage data as JSON
    #[error("failed to encode usage data")]
    Encoding(#[from] serde_json::Error),

    /// Error creating, writing or reading one of the exchange files
    #[error("failed to access exchange file {}", path.display())]
    ExchangeFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The algorithm requests bucketing without a usable bucket size
    #[error("invalid bucket size '{bucket_size}' configured for algorithm {identifier}")]
    InvalidBucketSize {
        identifier: String,
        bucket_size: String,
    },

    /// A metadata file exists but is not valid YAML of the expected shape
    #[error("failed to decode metadata file {}", path.display())]
    MetadataDecode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A metadata file exists but cannot be read
    #[error("failed to read metadata file {}", path.display())]
    MetadataRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A metadata file declares an inconsistent parameter
    #[error("invalid declaration of parameter {parameter} in {}", path.display())]
    MetadataInvalid {
        path: PathBuf,
        parameter: String,
        #[source]
        source: validator::ValidationErrors,
    },

    /// A forecast was requested for an algorithm without metadata
    #[error("no metadata available for algorithm {identifier}")]
    MissingMetadata { identifier: String },

    /// Error reading the multipart parameter upload
    #[error("failed to read parameter upload")]
    Multipart(#[from] MultipartError),

    /// The request body could not be interpreted as multipart form data
    #[error("request body is not a valid parameter upload")]
    MultipartRejection(#[from] MultipartRejection),

    /// The request did not name an algorithm
    #[error("no algorithm specified")]
    NoAlgorithmSpecified,

    /// The request did not contain a municipality key
    #[error("no area selected, at least one municipality key is required")]
    NoAreaSelected,

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// No algorithm with the requested identifier exists
    #[error("unknown algorithm {identifier}")]
    UnknownAlgorithm { identifier: String },

    /// A named query is missing from the query catalog
    #[error("unknown named query {name}")]
    UnknownQuery { name: String },
}

impl ForecastError {
    /// Stable error code of this error.
    pub fn code(&self) -> &'static str {
        self.into()
    }

    /// Short human readable summary of the error class.
    fn title(&self, status: StatusCode) -> String {
        match self {
            Self::InvalidBucketSize { .. } => "Invalid Bucket Size".to_string(),
            Self::NoAlgorithmSpecified => "No Algorithm Specified".to_string(),
            Self::NoAreaSelected => "No Area Selected".to_string(),
            Self::UnknownAlgorithm { .. } => "Unknown Algorithm".to_string(),
            _ => status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
        }
    }

    /// HTTP status of the response generated for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            // Bad request
            Self::InvalidBucketSize { .. }
            | Self::Multipart(_)
            | Self::MultipartRejection(_)
            | Self::NoAlgorithmSpecified
            | Self::NoAreaSelected => StatusCode::BAD_REQUEST,

            // Not found
            Self::UnknownAlgorithm { .. } => StatusCode::NOT_FOUND,

            // Gateway timeout
            Self::AlgorithmTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            // Internal server error
            Self::AlgorithmFailed { .. }
            | Self::AlgorithmSpawn { .. }
            | Self::AlgorithmDirectory { .. }
            | Self::Database(_)
            | Self::Encoding(_)
            | Self::ExchangeFile { .. }
            | Self::MetadataDecode { .. }
            | Self::MetadataInvalid { .. }
            | Self::MetadataRead { .. }
            | Self::MissingMetadata { .. }
            | Self::SemaphoreAcquireError(_)
            | Self::UnknownQuery { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ForecastError {
    /// Convert from a `ForecastError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response in the style of RFC 9457 problem details
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProblemDetails {
    /// URN identifying the error code
    #[serde(rename = "type")]
    kind: String,

    /// HTTP status code, repeated in the body
    status: u16,

    /// Summary of the error class
    title: String,

    /// Main error message
    detail: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ProblemDetails {
    /// Return a new ProblemDetails
    ///
    /// The chain of causes is only exposed for client errors. Server errors are logged with
    /// their causes instead.
    fn new(status: StatusCode, error: &ForecastError) -> Self {
        let mut caused_by = None;
        if status.is_client_error() {
            let mut current = error.source();
            while let Some(source) = current {
                let mut causes: Vec<String> = caused_by.unwrap_or_default();
                causes.push(source.to_string());
                caused_by = Some(causes);
                current = source.source();
            }
            // Remove duplicate entries.
            if let Some(caused_by) = caused_by.as_mut() {
                caused_by.dedup()
            }
        }
        ProblemDetails {
            kind: format!("{}{}", PROBLEM_TYPE_PREFIX, error.code()),
            status: status.as_u16(),
            title: error.title(status),
            detail: error.to_string(),
            caused_by,
        }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    #[serde(flatten)]
    problem: ProblemDetails,
}

impl From<ForecastError> for ErrorResponse {
    /// Convert from a `ForecastError` into an `ErrorResponse`.
    fn from(error: ForecastError) -> Self {
        let status = error.status();

        // Log server errors.
        if status.is_server_error() {
            event!(Level::ERROR, code = error.code(), "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
            if let ForecastError::AlgorithmFailed { stderr, .. } = &error {
                if !stderr.is_empty() {
                    event!(Level::ERROR, "Algorithm stderr: {}", stderr);
                }
            }
        }

        ErrorResponse {
            status,
            problem: ProblemDetails::new(status, &error),
        }
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as problem JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, PROBLEM_JSON)],
                json_body,
            )
                .into_response(),
        }
    }
}
