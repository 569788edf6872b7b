//! Command Line Interface (CLI) arguments.

use byte_unit::Byte;
use clap::Parser;
use std::path::PathBuf;
use url::Url;

/// Interpreter used to run algorithm scripts when none is configured.
#[cfg(windows)]
const DEFAULT_INTERPRETER: Option<&str> = Some("python");
#[cfg(not(windows))]
const DEFAULT_INTERPRETER: Option<&str> = None;

/// Usage forecasts command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "USAGE_FORECASTS_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "USAGE_FORECASTS_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "USAGE_FORECASTS_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/usage-forecasts/certs/cert.pem",
        env = "USAGE_FORECASTS_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/usage-forecasts/certs/key.pem",
        env = "USAGE_FORECASTS_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for operations to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "USAGE_FORECASTS_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Directory containing the algorithm scripts and their metadata files
    #[arg(long, env = "USAGE_FORECASTS_ALGORITHM_DIR")]
    pub algorithm_dir: PathBuf,
    /// File extensions identifying algorithm scripts
    #[arg(
        long,
        default_value = "py,rscript",
        value_delimiter = ',',
        env = "USAGE_FORECASTS_ALGORITHM_EXTENSIONS"
    )]
    pub algorithm_extensions: Vec<String>,
    /// Interpreter to run algorithm scripts with. Scripts are executed directly if not set.
    #[arg(long, env = "USAGE_FORECASTS_ALGORITHM_INTERPRETER")]
    pub algorithm_interpreter: Option<String>,
    /// Maximum time in seconds an algorithm may run before it is killed
    #[arg(long, default_value_t = 300, env = "USAGE_FORECASTS_ALGORITHM_TIMEOUT")]
    pub algorithm_timeout: u64,
    /// Maximum number of algorithms running concurrently. Default is the number of CPUs.
    #[arg(long, env = "USAGE_FORECASTS_PROCESS_LIMIT")]
    pub process_limit: Option<usize>,
    /// Directory in which exchange files are created. Default is the system temporary directory.
    #[arg(long, env = "USAGE_FORECASTS_EXCHANGE_DIR")]
    pub exchange_dir: Option<PathBuf>,
    /// Maximum size of a forecast request body
    #[arg(long, default_value = "5 MiB", env = "USAGE_FORECASTS_MAX_PARAMETER_SIZE")]
    pub max_parameter_size: Byte,
    /// URL of the PostgreSQL database holding the usage data
    #[arg(long, env = "USAGE_FORECASTS_DATABASE_URL")]
    pub database_url: Url,
    /// Maximum number of database connections
    #[arg(long, default_value_t = 10, env = "USAGE_FORECASTS_DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
}

impl CommandLineArgs {
    /// Returns the configured interpreter, falling back to the platform default.
    pub fn interpreter(&self) -> Option<String> {
        self.algorithm_interpreter
            .clone()
            .or_else(|| DEFAULT_INTERPRETER.map(str::to_string))
    }

    /// Returns the directory for exchange files.
    pub fn exchange_dir(&self) -> PathBuf {
        self.exchange_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
