use crate::app_state::AppState;
use crate::cli::CommandLineArgs;
use crate::error::ForecastError;
use crate::models::*;
use crate::planner::UsageQuery;
use crate::registry;
use crate::store::UsageStore;

use async_trait::async_trait;
use byte_unit::Byte;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use time::macros::datetime;
use url::Url;
use uuid::Uuid;

/// Metadata of the linear regression test algorithm.
pub(crate) const LINREG_METADATA: &str = r#"displayName: Linear Regression
description: Fits a straight line through the usage history
useBuckets: false
parameters:
  years:
    description: number of years to forecast
    default: 30
    type: int
    enums: ["10", "30"]
    min: 1
    max: 100
"#;

/// Create a ParameterSpec object with all fields set.
pub(crate) fn get_test_parameter() -> ParameterSpec {
    ParameterSpec {
        description: "number of years to forecast".to_string(),
        default: serde_json::json!(30),
        kind: "int".to_string(),
        enums: Some(vec!["10".to_string(), "30".to_string()]),
        min: Some(1.into()),
        max: Some(100.into()),
    }
}

/// Create an AlgorithmDescriptor for a file that need not exist.
pub(crate) fn get_test_descriptor(metadata: Option<AlgorithmMetadata>) -> AlgorithmDescriptor {
    AlgorithmDescriptor {
        identifier: "linreg".to_string(),
        filename: "linreg.py".to_string(),
        path: PathBuf::from("/algorithms/linreg.py"),
        metadata,
    }
}

/// Create an AlgorithmDescriptor without metadata for a file in `dir`.
pub(crate) fn get_test_descriptor_at(dir: &Path, filename: &str) -> AlgorithmDescriptor {
    AlgorithmDescriptor {
        identifier: registry::identifier_of(filename).to_string(),
        filename: filename.to_string(),
        path: dir.join(filename),
        metadata: None,
    }
}

/// Write a file into `dir`, returning its path.
pub(crate) fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Write an executable shell script into `dir`.
#[cfg(unix)]
pub(crate) fn write_algorithm(dir: &Path, name: &str, body: &str) -> AlgorithmDescriptor {
    use std::os::unix::fs::PermissionsExt;

    let path = write_file(dir, name, &format!("#!/bin/sh\n{body}\n"));
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    get_test_descriptor_at(dir, name)
}

/// Write the linear regression test algorithm and its metadata into `dir`.
pub(crate) fn write_linreg(dir: &Path, body: &str) {
    write_file(dir, "linreg.py", body);
    write_file(dir, "linreg.yaml", LINREG_METADATA);
}

/// Create CommandLineArgs running scripts in `algorithm_dir` through `sh`.
pub(crate) fn get_test_args(algorithm_dir: &Path) -> CommandLineArgs {
    CommandLineArgs {
        host: "127.0.0.1".to_string(),
        port: 8080,
        https: false,
        cert_file: String::new(),
        key_file: String::new(),
        graceful_shutdown_timeout: 1,
        algorithm_dir: algorithm_dir.to_path_buf(),
        algorithm_extensions: vec!["py".to_string()],
        algorithm_interpreter: Some("sh".to_string()),
        algorithm_timeout: 10,
        process_limit: Some(2),
        exchange_dir: None,
        max_parameter_size: Byte::from_u64(64 * 1024),
        database_url: Url::parse("postgres://localhost/usage_forecasts").unwrap(),
        database_max_connections: 1,
    }
}

/// Create an AppState over test directories and a store.
pub(crate) fn get_test_state(
    algorithm_dir: &Path,
    exchange_dir: &Path,
    store: Arc<dyn UsageStore>,
) -> AppState {
    let mut args = get_test_args(algorithm_dir);
    args.exchange_dir = Some(exchange_dir.to_path_buf());
    AppState::new(&args, store)
}

/// Deterministic usage type id of a test consumer group.
pub(crate) fn usage_type_id(external_id: &str) -> Uuid {
    let mut bytes = [0_u8; 16];
    for (byte, id) in bytes.iter_mut().zip(external_id.bytes()) {
        *byte = id;
    }
    Uuid::from_bytes(bytes)
}

/// Usage rows returned by [FakeStore], deliberately out of time order.
pub(crate) fn get_test_usages() -> Vec<UsageDataPoint> {
    vec![
        UsageDataPoint {
            municipality: "03241001".to_string(),
            usage_type: Some(usage_type_id("A1")),
            timestamp: datetime!(2022-01-01 00:00 UTC),
            amount: 120.5,
        },
        UsageDataPoint {
            municipality: "03241001".to_string(),
            usage_type: Some(usage_type_id("A1")),
            timestamp: datetime!(2020-01-01 00:00 UTC),
            amount: 98.0,
        },
        UsageDataPoint {
            municipality: "0324".to_string(),
            usage_type: None,
            timestamp: datetime!(2021-01-01 00:00 UTC),
            amount: 101.25,
        },
    ]
}

/// In-memory [UsageStore] recording the lookups and queries it receives.
#[derive(Debug, Default)]
pub(crate) struct FakeStore {
    fail: bool,
    lookups: Mutex<Vec<Vec<String>>>,
    queries: Mutex<Vec<UsageQuery>>,
}

impl FakeStore {
    /// A store whose usage queries fail.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Consumer group lookups received so far.
    pub(crate) fn lookups(&self) -> Vec<Vec<String>> {
        self.lookups.lock().unwrap().clone()
    }

    /// Usage queries received so far.
    pub(crate) fn queries(&self) -> Vec<UsageQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageStore for FakeStore {
    async fn usage_types(&self) -> Result<Vec<UsageType>, ForecastError> {
        Ok(["A1", "B2"]
            .into_iter()
            .map(|external_id| UsageType {
                id: usage_type_id(external_id),
                name: format!("Group {external_id}"),
                description: None,
                external_identifier: external_id.to_string(),
            })
            .collect())
    }

    async fn usage_types_by_external_id(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<UsageType>, ForecastError> {
        self.lookups.lock().unwrap().push(external_ids.to_vec());
        let usage_types = self.usage_types().await?;
        Ok(usage_types
            .into_iter()
            .filter(|usage_type| external_ids.contains(&usage_type.external_identifier))
            .collect())
    }

    async fn usages(&self, query: &UsageQuery) -> Result<Vec<UsageDataPoint>, ForecastError> {
        self.queries.lock().unwrap().push(query.clone());
        if self.fail {
            return Err(sqlx::Error::PoolTimedOut.into());
        }
        Ok(get_test_usages())
    }
}

/// Build a multipart/form-data body, returning the content type and the body.
pub(crate) fn multipart_body(fields: &[(&str, &str)]) -> (String, String) {
    let boundary = "usage-forecasts-test-boundary";
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));
    (format!("multipart/form-data; boundary={boundary}"), body)
}
