//! Algorithm discovery.
//!
//! Algorithms are executable scripts in a single directory. An algorithm's identifier is its file
//! name up to the first `.`, and a sibling `<identifier>.yaml` (or `.yml`) file holds its
//! metadata. The directory is scanned on every call so that algorithms added or removed on disk
//! are picked up without a restart.

use crate::error::ForecastError;
use crate::models::{AlgorithmDescriptor, AlgorithmMetadata};

use hashbrown::HashSet;
use std::path::{Path, PathBuf};
use tracing::{event, Level};
use validator::Validate;

/// Extensions of metadata files, in order of preference.
const METADATA_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Catalog of the algorithms in a directory.
#[derive(Clone, Debug)]
pub struct AlgorithmRegistry {
    /// Directory containing the algorithms
    directory: PathBuf,
    /// Recognised algorithm file extensions, lowercase and without a leading `.`
    extensions: Vec<String>,
}

impl AlgorithmRegistry {
    /// Returns a new AlgorithmRegistry.
    ///
    /// # Arguments
    ///
    /// * `directory`: Directory containing the algorithms
    /// * `extensions`: Recognised algorithm file extensions
    pub fn new(directory: impl Into<PathBuf>, extensions: &[String]) -> Self {
        let extensions = extensions
            .iter()
            .map(|extension| extension.trim_start_matches('.').to_lowercase())
            .filter(|extension| !extension.is_empty())
            .collect();
        Self {
            directory: directory.into(),
            extensions,
        }
    }

    /// Directory containing the algorithms.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Lists all algorithms, sorted by file name.
    ///
    /// A metadata file that exists but cannot be decoded fails the whole listing.
    pub async fn list(&self) -> Result<Vec<AlgorithmDescriptor>, ForecastError> {
        let mut descriptors = vec![];
        for (identifier, filename) in self.scan().await? {
            descriptors.push(self.describe(identifier, filename).await?);
        }
        Ok(descriptors)
    }

    /// Resolves a single algorithm by its identifier.
    ///
    /// # Arguments
    ///
    /// * `identifier`: Identifier of the algorithm
    pub async fn resolve(&self, identifier: &str) -> Result<AlgorithmDescriptor, ForecastError> {
        let found = self
            .scan()
            .await?
            .into_iter()
            .find(|(candidate, _)| candidate == identifier);
        match found {
            Some((identifier, filename)) => self.describe(identifier, filename).await,
            None => Err(ForecastError::UnknownAlgorithm {
                identifier: identifier.to_string(),
            }),
        }
    }

    /// Returns (identifier, file name) pairs of the algorithm files in the directory, sorted by
    /// file name.
    async fn scan(&self) -> Result<Vec<(String, String)>, ForecastError> {
        let directory_error = |source| ForecastError::AlgorithmDirectory {
            path: self.directory.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(directory_error)?;
        let mut algorithms = vec![];
        while let Some(entry) = entries.next_entry().await.map_err(directory_error)? {
            // Follows symlinks, so linked scripts are accepted.
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    event!(
                        Level::WARN,
                        "Skipping unreadable entry {}: {}",
                        entry.path().display(),
                        err
                    );
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.is_algorithm(&filename) {
                continue;
            }
            let identifier = identifier_of(&filename).to_string();
            if identifier.is_empty() {
                continue;
            }
            algorithms.push((identifier, filename));
        }
        algorithms.sort_by(|a, b| a.1.cmp(&b.1));
        // Identifiers are unique. The first file by name wins.
        let mut identifiers = HashSet::new();
        algorithms.retain(|(identifier, filename)| {
            let first = identifiers.insert(identifier.clone());
            if !first {
                event!(
                    Level::WARN,
                    "Skipping algorithm file {} with duplicate identifier {}",
                    filename,
                    identifier
                );
            }
            first
        });
        Ok(algorithms)
    }

    /// Whether the file name carries a recognised algorithm extension.
    fn is_algorithm(&self, filename: &str) -> bool {
        match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(extension) => self
                .extensions
                .iter()
                .any(|known| known.eq_ignore_ascii_case(extension)),
            None => false,
        }
    }

    /// Builds the descriptor of an algorithm file, reading its metadata if present.
    async fn describe(
        &self,
        identifier: String,
        filename: String,
    ) -> Result<AlgorithmDescriptor, ForecastError> {
        let path = self.directory.join(&filename);
        let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        let metadata = self.read_metadata(&identifier).await?;
        if metadata.is_none() {
            event!(Level::DEBUG, "No metadata for algorithm {}", identifier);
        }
        Ok(AlgorithmDescriptor {
            identifier,
            filename,
            path,
            metadata,
        })
    }

    /// Reads and validates the metadata file of an algorithm, if one exists.
    async fn read_metadata(
        &self,
        identifier: &str,
    ) -> Result<Option<AlgorithmMetadata>, ForecastError> {
        for extension in METADATA_EXTENSIONS {
            let path = self.directory.join(format!("{identifier}.{extension}"));
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(ForecastError::MetadataRead { path, source }),
            };
            return parse_metadata(&path, &contents).map(Some);
        }
        Ok(None)
    }
}

/// Returns the identifier of an algorithm file: the file name up to the first `.`.
pub fn identifier_of(filename: &str) -> &str {
    filename.split('.').next().unwrap_or_default()
}

/// Decodes and validates metadata file contents.
fn parse_metadata(path: &Path, contents: &str) -> Result<AlgorithmMetadata, ForecastError> {
    if contents.trim().is_empty() {
        return Ok(AlgorithmMetadata::default());
    }
    let metadata: AlgorithmMetadata =
        serde_yaml::from_str(contents).map_err(|source| ForecastError::MetadataDecode {
            path: path.to_path_buf(),
            source,
        })?;
    for (name, parameter) in &metadata.parameters {
        parameter
            .validate()
            .map_err(|source| ForecastError::MetadataInvalid {
                path: path.to_path_buf(),
                parameter: name.clone(),
                source,
            })?;
    }
    Ok(metadata)
}
