//! Algorithm process invocation.
//!
//! An algorithm is called with three positional arguments: the input, output and parameter file
//! paths, in that order. Its standard output and error are captured for diagnostics only. The
//! result is whatever it leaves in the output file, and only counts if it exits successfully.

use crate::cli::CommandLineArgs;
use crate::error::ForecastError;
use crate::exchange::ExchangeFiles;
use crate::metrics::{ALGORITHM_DURATION, ALGORITHM_INVOCATIONS};
use crate::models::AlgorithmDescriptor;

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{event, Level};

/// Bytes of each output stream kept for diagnostics. The rest is discarded.
const CAPTURE_LIMIT: u64 = 64 * 1024;

/// How algorithm files are started
#[derive(Clone, Debug, PartialEq)]
pub enum InvocationStrategy {
    /// Execute the algorithm file itself
    Direct,
    /// Pass the algorithm file to an interpreter
    Interpreter(String),
}

/// Runs algorithms against exchange files.
#[derive(Clone, Debug)]
pub struct AlgorithmInvoker {
    /// How processes are started
    strategy: InvocationStrategy,
    /// Maximum run time of one process
    timeout: Duration,
}

/// Kills the process group of an algorithm when dropped, unless disarmed.
///
/// Algorithms run in their own process group, so this also reaches any processes they started.
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    /// Returns a guard for the group led by `child`.
    fn new(child: &Child) -> Self {
        Self {
            pgid: child.id().and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    /// Leave the group alone on drop.
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid {
            kill_process_group(pgid);
        }
    }
}

/// Send SIGKILL to every process in a group.
#[cfg(unix)]
fn kill_process_group(pgid: i32) {
    // SAFETY: killpg takes no pointers. An already empty group is reported as ESRCH.
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            event!(Level::WARN, "Failed to kill process group {}: {}", pgid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: i32) {}

/// Read a child output stream, keeping at most [CAPTURE_LIMIT] bytes.
///
/// The stream is drained to the end so the child never blocks on a full pipe.
async fn capture<R: AsyncRead + Unpin>(stream: Option<R>) -> Vec<u8> {
    let Some(mut stream) = stream else {
        return vec![];
    };
    let mut captured = vec![];
    if let Err(err) = (&mut stream).take(CAPTURE_LIMIT).read_to_end(&mut captured).await {
        event!(Level::DEBUG, "Failed to read algorithm output: {}", err);
        return captured;
    }
    if let Err(err) = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await {
        event!(Level::DEBUG, "Failed to drain algorithm output: {}", err);
    }
    captured
}

impl AlgorithmInvoker {
    /// Returns a new AlgorithmInvoker.
    pub fn new(strategy: InvocationStrategy, timeout: Duration) -> Self {
        Self { strategy, timeout }
    }

    /// Returns an AlgorithmInvoker configured from the command line.
    pub fn from_args(args: &CommandLineArgs) -> Self {
        let strategy = match args.interpreter() {
            Some(interpreter) => InvocationStrategy::Interpreter(interpreter),
            None => InvocationStrategy::Direct,
        };
        Self::new(strategy, Duration::from_secs(args.algorithm_timeout))
    }

    /// Build the command running an algorithm.
    fn command(&self, algorithm: &AlgorithmDescriptor, files: &ExchangeFiles) -> Command {
        let mut command = match &self.strategy {
            InvocationStrategy::Direct => Command::new(&algorithm.path),
            InvocationStrategy::Interpreter(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&algorithm.path);
                command
            }
        };
        command
            .arg(files.input())
            .arg(files.output())
            .arg(files.parameter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // A fresh process group, so the whole tree can be killed.
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    /// Run an algorithm and wait for it to exit.
    ///
    /// The algorithm and every process it started are killed if it runs longer than the
    /// configured timeout, or if the returned future is dropped first.
    ///
    /// # Arguments
    ///
    /// * `algorithm`: The algorithm to run
    /// * `files`: Exchange files holding its input and receiving its output
    pub async fn invoke(
        &self,
        algorithm: &AlgorithmDescriptor,
        files: &ExchangeFiles,
    ) -> Result<(), ForecastError> {
        let identifier = algorithm.identifier.as_str();
        let failure = |source| {
            ALGORITHM_INVOCATIONS
                .with_label_values(&[identifier, "failure"])
                .inc();
            ForecastError::AlgorithmSpawn {
                identifier: identifier.to_string(),
                source,
            }
        };
        event!(Level::DEBUG, "Calling algorithm {}", identifier);
        let start = Instant::now();
        let mut child = self.command(algorithm, files).spawn().map_err(failure)?;
        let mut group = ProcessGroupGuard::new(&child);
        let result = tokio::time::timeout(self.timeout, wait(&mut child)).await;
        ALGORITHM_DURATION
            .with_label_values(&[identifier])
            .observe(start.elapsed().as_secs_f64());
        let (status, stdout, stderr) = match result {
            Ok((status, stdout, stderr)) => {
                let status = status.map_err(failure)?;
                group.disarm();
                (status, stdout, stderr)
            }
            Err(_) => {
                ALGORITHM_INVOCATIONS
                    .with_label_values(&[identifier, "timeout"])
                    .inc();
                // Kill the whole group now rather than when the guard goes out of scope.
                drop(group);
                return Err(ForecastError::AlgorithmTimeout {
                    identifier: identifier.to_string(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };
        if !stdout.is_empty() {
            event!(
                Level::DEBUG,
                "Algorithm {} stdout: {}",
                identifier,
                String::from_utf8_lossy(&stdout)
            );
        }
        if !status.success() {
            ALGORITHM_INVOCATIONS
                .with_label_values(&[identifier, "failure"])
                .inc();
            return Err(ForecastError::AlgorithmFailed {
                identifier: identifier.to_string(),
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }
        ALGORITHM_INVOCATIONS
            .with_label_values(&[identifier, "success"])
            .inc();
        event!(
            Level::DEBUG,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Algorithm {} finished",
            identifier
        );
        Ok(())
    }
}

/// Wait for a child to exit while capturing its output streams.
async fn wait(child: &mut Child) -> (std::io::Result<ExitStatus>, Vec<u8>, Vec<u8>) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::join!(child.wait(), capture(stdout), capture(stderr))
}
