use super::{CalculationRequest, Failure, RequestError, RunOutcome};
use itertools::Itertools;
use once_cell::sync::Lazy;
use std::{
    ffi::OsString,
    fs::File,
    io,
    path::PathBuf,
    process::{Command, ExitStatus, Stdio},
    time::Instant,
};
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// Program used to wrap the executable when a calculation asks for parallel execution
pub static PARALLEL_LAUNCHER: Lazy<OsString> = Lazy::new(|| OsString::from("mpirun"));

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to open log file {path:?}: {source}")]
    OpenLog { path: PathBuf, source: io::Error },
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("Failed to wait for `{command}`: {source}")]
    Wait { command: String, source: io::Error },
    #[error("`{command}` exited with code {code}")]
    Exit { command: String, code: i32 },
    #[error("`{command}` was terminated by signal {signal}")]
    Signal { command: String, signal: i32 },
    #[error("`{command}` exited unsuccessfully ({status})")]
    Unknown { command: String, status: ExitStatus },
}

impl From<RunError> for Failure {
    fn from(error: RunError) -> Self {
        let message = error.to_string();

        match error {
            RunError::OpenLog { .. } | RunError::Spawn { .. } => Failure::launch(message),
            RunError::Exit { code, .. } => Failure::execution(message, Some(code)),
            RunError::Signal { .. } | RunError::Unknown { .. } => {
                Failure::execution(message, None)
            }
            RunError::Wait { .. } => Failure::internal(message),
        }
    }
}

/// Runs one calculation to completion on the calling thread
#[derive(Debug, Clone)]
pub struct Runner {
    request: CalculationRequest,
    parallel_launcher: OsString,
}

impl Runner {
    pub fn new(request: CalculationRequest) -> Result<Self, RequestError> {
        request.validate()?;

        Ok(Self {
            request,
            parallel_launcher: PARALLEL_LAUNCHER.clone(),
        })
    }

    /// replace the default `mpirun` wrapper
    pub fn with_parallel_launcher(mut self, program: impl Into<OsString>) -> Self {
        self.parallel_launcher = program.into();
        self
    }

    pub fn request(&self) -> &CalculationRequest {
        &self.request
    }

    /// full command line, `core_count` only shows up with the parallel launcher
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(4);

        if self.request.use_parallel_launcher {
            argv.push(self.parallel_launcher.clone());
            argv.push(OsString::from("-np"));
            argv.push(OsString::from(self.request.core_count.to_string()));
        }
        argv.push(self.request.executable.clone().into_os_string());

        argv
    }

    /// Execute the calculation and block until the process exits
    ///
    /// Never panics on a failing calculation, every failure is folded into the outcome.
    #[instrument(skip(self), level = "debug", fields(dir = ?self.request.working_directory))]
    pub fn run(&self) -> RunOutcome {
        match self.execute() {
            Ok(()) => RunOutcome::Success,
            Err(error) => {
                debug!(error = %error, "Calculation failed");

                RunOutcome::Failure(error.into())
            }
        }
    }

    fn execute(&self) -> Result<(), RunError> {
        let argv = self.argv();
        let command_line = argv.iter().map(|arg| arg.to_string_lossy()).join(" ");
        let log_path = self.request.log_path();

        // stdout and stderr share one open file so their output stays interleaved
        let log = File::create(&log_path).map_err(|source| RunError::OpenLog {
            path: log_path.clone(),
            source,
        })?;
        let log_err = log.try_clone().map_err(|source| RunError::OpenLog {
            path: log_path.clone(),
            source,
        })?;

        let start = Instant::now();
        let mut child = command(&argv)
            .current_dir(&self.request.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|source| RunError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        debug!("Waiting on `{command_line}` (pid {})", child.id());
        let status = child.wait().map_err(|source| RunError::Wait {
            command: command_line.clone(),
            source,
        })?;

        trace!(
            "Finished in {} ms | status: {status}",
            start.elapsed().as_millis()
        );

        check_status(command_line, status)
    }
}

// the first element is the program, the rest are its arguments
fn command(argv: &[OsString]) -> Command {
    let mut argv = argv.iter();
    let mut command = Command::new(argv.next().map(OsString::as_os_str).unwrap_or_default());
    command.args(argv);

    command
}

fn check_status(command: String, status: ExitStatus) -> Result<(), RunError> {
    if status.success() {
        return Ok(());
    }

    if let Some(code) = status.code() {
        return Err(RunError::Exit { command, code });
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return Err(RunError::Signal { command, signal });
        }
    }

    Err(RunError::Unknown { command, status })
}
