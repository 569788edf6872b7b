//! Data types and associated functions and methods

use crate::error::ForecastError;

use bytes::Bytes;
use hashbrown::HashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::{Validate, ValidationError};

lazy_static! {
    // A PostgreSQL interval made of a single positive quantity and unit.
    static ref BUCKET_WIDTH: Regex = Regex::new(
        r"(?i)^\s*([1-9][0-9]*)\s*(microseconds?|milliseconds?|seconds?|minutes?|hours?|days?|weeks?|months?|years?)\s*$"
    )
    .unwrap();
}

/// Description of a single parameter an algorithm accepts
///
/// This is purely descriptive metadata surfaced to callers. Values supplied in a request are
/// handed to the algorithm without being checked against it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[validate(schema(function = "validate_parameter_range"))]
pub struct ParameterSpec {
    /// How to use the parameter and what effect it has
    #[serde(default)]
    pub description: String,
    /// Default value, interpreted by the algorithm
    #[serde(default)]
    pub default: serde_json::Value,
    /// Free-form tag naming the expected kind of value
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "parameter type must not be empty"))]
    pub kind: String,
    /// Allowed values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enums: Option<Vec<String>>,
    /// Numerical lower limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<serde_json::Number>,
    /// Numerical upper limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<serde_json::Number>,
}

/// Validate that a parameter's lower limit does not exceed its upper limit
fn validate_parameter_range(parameter: &ParameterSpec) -> Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (&parameter.min, &parameter.max) {
        if min.as_f64() > max.as_f64() {
            let mut error = ValidationError::new("Parameter min must not be greater than max");
            error.add_param("min".into(), &min.to_string());
            error.add_param("max".into(), &max.to_string());
            return Err(error);
        }
    }
    Ok(())
}

/// Contents of an algorithm's YAML metadata file
// NOTE: The aliases accept the lowercase keys written by older tooling.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmMetadata {
    /// Human readable name of the algorithm
    #[serde(default, alias = "displayname")]
    pub display_name: Option<String>,
    /// Description of the algorithm
    #[serde(default)]
    pub description: String,
    /// Parameters that may be passed to the algorithm in the request body
    #[serde(default)]
    pub parameters: HashMap<String, ParameterSpec>,
    /// Whether usage data is pre-aggregated into time buckets
    #[serde(default, alias = "usebuckets")]
    pub use_buckets: bool,
    /// Width of each time bucket
    #[serde(default, alias = "bucketsize")]
    pub bucket_size: Option<String>,
}

/// Width of a time bucket, in PostgreSQL interval syntax (e.g. `1 month`)
#[derive(Clone, Debug, PartialEq)]
pub struct BucketWidth(String);

impl BucketWidth {
    /// Returns the interval text passed to the database.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for BucketWidth {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = BUCKET_WIDTH.captures(s).ok_or(())?;
        Ok(BucketWidth(format!(
            "{} {}",
            &captures[1],
            captures[2].to_lowercase()
        )))
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An algorithm discovered in the algorithm directory
#[derive(Clone, Debug, PartialEq)]
pub struct AlgorithmDescriptor {
    /// Identifier, the file name up to the first `.`
    pub identifier: String,
    /// File name of the executable
    pub filename: String,
    /// Absolute path of the executable
    pub path: PathBuf,
    /// Metadata, if a metadata file exists
    pub metadata: Option<AlgorithmMetadata>,
}

impl AlgorithmDescriptor {
    /// Returns the catalog entry for this algorithm.
    pub fn information(&self) -> AlgorithmInformation {
        let metadata = self.metadata.clone().unwrap_or_default();
        AlgorithmInformation {
            identifier: self.identifier.clone(),
            filename: self.filename.clone(),
            description: metadata.description,
            display_name: metadata.display_name,
            parameter: metadata.parameters,
        }
    }

    /// Returns the bucket width to aggregate usage data with, or `None` if the algorithm works on
    /// raw rows.
    ///
    /// Choosing a query requires metadata, so its absence is an error here.
    pub fn bucketing(&self) -> Result<Option<BucketWidth>, ForecastError> {
        let metadata = self
            .metadata
            .as_ref()
            .ok_or_else(|| ForecastError::MissingMetadata {
                identifier: self.identifier.clone(),
            })?;
        if !metadata.use_buckets {
            return Ok(None);
        }
        let bucket_size = metadata.bucket_size.clone().unwrap_or_default();
        bucket_size
            .parse()
            .map(Some)
            .map_err(|_| ForecastError::InvalidBucketSize {
                identifier: self.identifier.clone(),
                bucket_size,
            })
    }
}

/// Catalog entry describing an algorithm to callers
#[derive(Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmInformation {
    /// Identifier used in forecast requests
    pub identifier: String,
    /// File name of the executable
    pub filename: String,
    /// Description of the algorithm
    pub description: String,
    /// Human readable name of the algorithm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Declared parameters
    pub parameter: HashMap<String, ParameterSpec>,
}

/// A consumer group (usage type)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UsageType {
    /// Internal identifier, referenced by usage rows
    pub id: Uuid,
    /// Name of the consumer group
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Stable identifier used by API callers
    pub external_identifier: String,
}

/// A single usage amount as handed to an algorithm
///
/// The serialised field names are part of the algorithm input format.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, sqlx::FromRow)]
pub struct UsageDataPoint {
    /// Municipality key
    #[serde(rename = "municipal")]
    pub municipality: String,
    /// Usage type id
    #[serde(rename = "usageType")]
    pub usage_type: Option<Uuid>,
    /// Start of the period, or of the bucket for aggregated rows
    #[serde(rename = "date", with = "time::serde::rfc3339")]
    #[sqlx(rename = "date")]
    pub timestamp: OffsetDateTime,
    /// Amount of water used
    pub amount: f64,
}

/// Parameters of a forecast request, taken from the path and query string
#[derive(Debug, PartialEq)]
pub struct ForecastRequest {
    /// Requested algorithm identifier
    pub algorithm: String,
    /// Municipality key prefixes, at least one
    pub keys: Vec<String>,
    /// External consumer group identifiers, if filtering was requested
    pub consumer_groups: Option<Vec<String>>,
}

impl ForecastRequest {
    /// Build a forecast request from the algorithm path segment and the raw query string.
    ///
    /// Both `key` and `consumerGroup` may be repeated. Blank values are ignored.
    ///
    /// # Arguments
    ///
    /// * `algorithm`: Algorithm identifier from the request path
    /// * `query`: Raw query string, if any
    pub fn parse(algorithm: &str, query: Option<&str>) -> Result<Self, ForecastError> {
        let mut keys = vec![];
        let mut consumer_groups = vec![];
        let pairs = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes());
        for (name, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name.as_ref() {
                "key" => keys.push(value.to_string()),
                "consumerGroup" => consumer_groups.push(value.to_string()),
                _ => (),
            }
        }
        if keys.is_empty() {
            return Err(ForecastError::NoAreaSelected);
        }
        let algorithm = algorithm.trim();
        if algorithm.is_empty() {
            return Err(ForecastError::NoAlgorithmSpecified);
        }
        Ok(ForecastRequest {
            algorithm: algorithm.to_string(),
            keys,
            consumer_groups: (!consumer_groups.is_empty()).then_some(consumer_groups),
        })
    }
}

/// Result of a successful forecast, the algorithm's output file verbatim
#[derive(Debug)]
pub struct ForecastOutput(pub Bytes);
