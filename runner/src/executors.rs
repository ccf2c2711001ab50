pub mod handle;
pub mod local;
pub mod outcome;
pub mod runner;

#[cfg(test)]
mod runner_test;

pub use handle::TaskHandle;
pub use local::LocalLauncher;
pub use outcome::{Failure, FailureKind, RunOutcome};
pub use runner::Runner;

use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, path::Path, path::PathBuf};
use thiserror::Error;

/// Errors raised on the caller's thread, never by a running calculation
#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Launcher is closed and does not accept new calculations")]
    Closed,
    #[error("Calculation #{index} is invalid: {source}")]
    InvalidRequest {
        index: usize,
        #[source]
        source: RequestError,
    },
    #[error("Worker pool requires at least one worker")]
    InvalidWorkers,
    #[error("Failed to build worker pool")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("executable path is empty")]
    EmptyExecutable,
    #[error("core count must be at least 1")]
    ZeroCores,
    #[error("log name {0:?} is not a plain file name")]
    InvalidLogName(String),
}

/// A single calculation: which executable to run, where, and how
///
/// The working directory must already hold every input file, it is neither created nor
/// checked for completeness before the executable starts.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CalculationRequest {
    #[serde(rename = "exec")]
    pub executable: PathBuf,
    #[serde(rename = "dir")]
    pub working_directory: PathBuf,
    // only used together with the parallel launcher
    #[serde(rename = "cores", default = "default_cores")]
    pub core_count: usize,
    #[serde(rename = "log", default = "default_log_name")]
    pub log_name: String,
    #[serde(rename = "mpi", default)]
    pub use_parallel_launcher: bool,
}

impl CalculationRequest {
    pub fn new(executable: impl Into<PathBuf>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            working_directory: working_directory.into(),
            core_count: default_cores(),
            log_name: default_log_name(),
            use_parallel_launcher: false,
        }
    }

    /// run through the parallel launcher with `cores` processes
    pub fn with_parallel_launcher(mut self, cores: usize) -> Self {
        self.use_parallel_launcher = true;
        self.core_count = cores;
        self
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.core_count = cores;
        self
    }

    pub fn with_log_name(mut self, log_name: impl Into<String>) -> Self {
        self.log_name = log_name.into();
        self
    }

    pub fn log_path(&self) -> PathBuf {
        self.working_directory.join(&self.log_name)
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.executable.as_os_str().is_empty() {
            return Err(RequestError::EmptyExecutable);
        }

        if self.core_count == 0 {
            return Err(RequestError::ZeroCores);
        }

        // the log has to land inside the working directory
        if Path::new(&self.log_name).file_name() != Some(OsStr::new(&self.log_name)) {
            return Err(RequestError::InvalidLogName(self.log_name.clone()));
        }

        Ok(())
    }
}

fn default_cores() -> usize {
    1
}

pub fn default_log_name() -> String {
    String::from("output.log")
}
