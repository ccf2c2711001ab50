//! Prepare calculation folders and launch VASP calculations concurrently on a local worker pool
pub mod config;
pub mod executors;
pub mod staging;

#[cfg(test)]
mod test_util;

pub use executors::{
    CalculationRequest, Failure, FailureKind, LauncherError, LocalLauncher, RunOutcome, Runner,
    TaskHandle,
};
