//! Files exchanged with an algorithm process.
//!
//! Each forecast uses three files sharing a random base name: `<base>.input` holds the usage data
//! as a JSON array, `<base>.output` starts empty and receives the algorithm's result and
//! `<base>.parameter` holds the caller's parameter upload verbatim. The files live exactly as long
//! as their [ExchangeFiles] guard.

use crate::error::ForecastError;
use crate::models::UsageDataPoint;

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{event, Level};
use uuid::Uuid;

/// Guard owning the exchange files of one forecast. Dropping it removes all three files.
#[derive(Debug)]
pub struct ExchangeFiles {
    input: PathBuf,
    output: PathBuf,
    parameter: PathBuf,
}

impl ExchangeFiles {
    /// Returns a new guard for files in `directory`. No file is created yet.
    pub fn new(directory: &Path) -> Self {
        let base = format!("forecast.{}", Uuid::new_v4().simple());
        Self {
            input: directory.join(format!("{base}.input")),
            output: directory.join(format!("{base}.output")),
            parameter: directory.join(format!("{base}.parameter")),
        }
    }

    /// Path of the usage data file.
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Path of the result file.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Path of the parameter file.
    pub fn parameter(&self) -> &Path {
        &self.parameter
    }

    /// Write the usage data to the input file.
    pub async fn write_input(&self, usages: &[UsageDataPoint]) -> Result<(), ForecastError> {
        let data = serde_json::to_vec(usages)?;
        write_new(&self.input, &data).await?;
        event!(
            Level::DEBUG,
            bytes = data.len(),
            "Wrote usage data to {}",
            self.input.display()
        );
        Ok(())
    }

    /// Create the empty output and parameter files.
    pub async fn prepare(&self) -> Result<(), ForecastError> {
        write_new(&self.output, &[]).await?;
        write_new(&self.parameter, &[]).await
    }

    /// Replace the contents of the parameter file.
    pub async fn write_parameter(&self, parameter: &[u8]) -> Result<(), ForecastError> {
        tokio::fs::write(&self.parameter, parameter)
            .await
            .map_err(|source| ForecastError::ExchangeFile {
                path: self.parameter.clone(),
                source,
            })?;
        event!(Level::DEBUG, bytes = parameter.len(), "Wrote parameter");
        Ok(())
    }

    /// Read the result written by the algorithm.
    pub async fn read_output(&self) -> Result<Bytes, ForecastError> {
        tokio::fs::read(&self.output)
            .await
            .map(Bytes::from)
            .map_err(|source| ForecastError::ExchangeFile {
                path: self.output.clone(),
                source,
            })
    }
}

impl Drop for ExchangeFiles {
    fn drop(&mut self) {
        for path in [&self.input, &self.output, &self.parameter] {
            match std::fs::remove_file(path) {
                Ok(()) => (),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
                Err(err) => event!(
                    Level::WARN,
                    "Failed to remove exchange file {}: {}",
                    path.display(),
                    err
                ),
            }
        }
    }
}

/// Create a file that must not exist yet and write `data` to it.
async fn write_new(path: &Path, data: &[u8]) -> Result<(), ForecastError> {
    let exchange_error = |source| ForecastError::ExchangeFile {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(exchange_error)?;
    file.write_all(data).await.map_err(exchange_error)?;
    file.flush().await.map_err(exchange_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn shared_base_name() {
        let files = ExchangeFiles::new(Path::new("/tmp"));
        let base = files.input().file_stem().unwrap();
        assert_eq!(base, files.output().file_stem().unwrap());
        assert_eq!(base, files.parameter().file_stem().unwrap());
        assert_eq!("input", files.input().extension().unwrap());
        assert_eq!("output", files.output().extension().unwrap());
        assert_eq!("parameter", files.parameter().extension().unwrap());
        assert!(base.to_str().unwrap().starts_with("forecast."));
        let other = ExchangeFiles::new(Path::new("/tmp"));
        assert_ne!(files.input(), other.input());
    }

    #[tokio::test]
    async fn lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let files = ExchangeFiles::new(dir.path());
        let usages = test_utils::get_test_usages();
        files.write_input(&usages).await.unwrap();
        files.prepare().await.unwrap();

        let input: Vec<UsageDataPoint> =
            serde_json::from_slice(&std::fs::read(files.input()).unwrap()).unwrap();
        assert_eq!(usages, input);
        assert_eq!(0, std::fs::metadata(files.output()).unwrap().len());
        assert_eq!(0, std::fs::metadata(files.parameter()).unwrap().len());

        files.write_parameter(br#"{"size": 5}"#).await.unwrap();
        assert_eq!(
            br#"{"size": 5}"#.to_vec(),
            std::fs::read(files.parameter()).unwrap()
        );

        std::fs::write(files.output(), "[1, 2]").unwrap();
        assert_eq!(Bytes::from("[1, 2]"), files.read_output().await.unwrap());

        drop(files);
        assert_eq!(0, std::fs::read_dir(dir.path()).unwrap().count());
    }

    #[tokio::test]
    async fn drop_before_files_exist() {
        let dir = tempfile::tempdir().unwrap();
        let files = ExchangeFiles::new(dir.path());
        files.write_input(&[]).await.unwrap();
        drop(files);
        assert_eq!(0, std::fs::read_dir(dir.path()).unwrap().count());
    }

    #[tokio::test]
    async fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let files = ExchangeFiles::new(&dir.path().join("missing"));
        let error = files.write_input(&[]).await.unwrap_err();
        assert!(
            matches!(error, ForecastError::ExchangeFile { .. }),
            "{error:?}"
        );
    }
}
