use std::fmt;

/// Category of a failed calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// the external process could not be started at all
    LaunchFailed,
    /// the external process ran but exited unsuccessfully
    ExecutionFailed,
    /// the task machinery itself faulted, e.g., a panic inside a worker
    InternalError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LaunchFailed => "launch failed",
            Self::ExecutionFailed => "execution failed",
            Self::InternalError => "internal error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// only set for `ExecutionFailed` when the process exited normally
    pub exit_code: Option<i32>,
}

impl Failure {
    pub fn launch(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::LaunchFailed,
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn execution(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            kind: FailureKind::ExecutionFailed,
            message: message.into(),
            exit_code,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InternalError,
            message: message.into(),
            exit_code: None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Terminal result of a single calculation
///
/// Failures are plain values: a worker converts everything that can go wrong into a
/// `RunOutcome` before it hands the result back, so nothing crosses a task boundary as a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure(Failure),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Success => None,
            Self::Failure(failure) => Some(failure),
        }
    }

    pub fn kind(&self) -> Option<FailureKind> {
        self.failure().map(|failure| failure.kind)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.failure().and_then(|failure| failure.exit_code)
    }
}

impl From<Failure> for RunOutcome {
    fn from(failure: Failure) -> Self {
        Self::Failure(failure)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure(failure) => failure.fmt(f),
        }
    }
}
