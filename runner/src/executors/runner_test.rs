use super::{CalculationRequest, FailureKind, RequestError, RunOutcome, Runner};
use crate::test_util::{script, serial, workdir};
use std::{ffi::OsString, fs, os::unix::fs::PermissionsExt};
use tempfile::tempdir;

#[test]
fn success_writes_interleaved_log() {
    let _lock = serial();
    let root = tempdir().unwrap();
    let exe = script(
        root.path(),
        "vasp",
        "echo first\necho second >&2\necho third",
    );
    let dir = workdir(root.path(), "calc");

    let outcome = Runner::new(CalculationRequest::new(&exe, &dir))
        .unwrap()
        .run();

    assert_eq!(outcome, RunOutcome::Success);
    assert_eq!(
        fs::read_to_string(dir.join("output.log")).unwrap(),
        "first\nsecond\nthird\n"
    );
}

#[test]
fn runs_inside_working_directory() {
    let _lock = serial();
    let root = tempdir().unwrap();
    let exe = script(root.path(), "vasp", "cat INCAR");
    let dir = workdir(root.path(), "calc");
    fs::write(dir.join("INCAR"), "ENCUT = 520\n").unwrap();

    let request = CalculationRequest::new(&exe, &dir).with_log_name("vasp.out");
    let outcome = Runner::new(request).unwrap().run();

    assert!(outcome.is_success());
    assert_eq!(
        fs::read_to_string(dir.join("vasp.out")).unwrap(),
        "ENCUT = 520\n"
    );
}

#[test]
fn existing_log_is_truncated() {
    let _lock = serial();
    let root = tempdir().unwrap();
    let exe = script(root.path(), "vasp", "echo fresh");
    let dir = workdir(root.path(), "calc");
    fs::write(dir.join("output.log"), "stale output from an earlier run\n").unwrap();

    Runner::new(CalculationRequest::new(&exe, &dir)).unwrap().run();

    assert_eq!(
        fs::read_to_string(dir.join("output.log")).unwrap(),
        "fresh\n"
    );
}

#[test]
fn nonzero_exit_is_execution_failure() {
    let _lock = serial();
    let root = tempdir().unwrap();
    let exe = script(root.path(), "vasp", "echo diverged >&2\nexit 3");
    let dir = workdir(root.path(), "calc");

    let outcome = Runner::new(CalculationRequest::new(&exe, &dir))
        .unwrap()
        .run();
    let failure = outcome.failure().unwrap();

    assert_eq!(failure.kind, FailureKind::ExecutionFailed);
    assert_eq!(failure.exit_code, Some(3));
    assert!(failure.message.contains("exited with code 3"));
    assert_eq!(
        fs::read_to_string(dir.join("output.log")).unwrap(),
        "diverged\n"
    );
}

#[test]
fn killed_process_is_execution_failure_without_code() {
    let _lock = serial();
    let root = tempdir().unwrap();
    let exe = script(root.path(), "vasp", "kill -9 $$");
    let dir = workdir(root.path(), "calc");

    let outcome = Runner::new(CalculationRequest::new(&exe, &dir))
        .unwrap()
        .run();

    assert_eq!(outcome.kind(), Some(FailureKind::ExecutionFailed));
    assert_eq!(outcome.exit_code(), None);
    assert!(outcome.failure().unwrap().message.contains("signal 9"));
}

#[test]
fn missing_executable_is_launch_failure() {
    let _lock = serial();
    let root = tempdir().unwrap();
    let dir = workdir(root.path(), "calc");

    let outcome = Runner::new(CalculationRequest::new(
        root.path().join("does-not-exist"),
        &dir,
    ))
    .unwrap()
    .run();

    assert_eq!(outcome.kind(), Some(FailureKind::LaunchFailed));
    assert_eq!(outcome.exit_code(), None);
}

#[test]
fn missing_working_directory_is_launch_failure() {
    let _lock = serial();
    let root = tempdir().unwrap();

    let outcome = Runner::new(CalculationRequest::new("/bin/true", root.path().join("nope")))
        .unwrap()
        .run();

    assert_eq!(outcome.kind(), Some(FailureKind::LaunchFailed));
    assert!(!root.path().join("nope").exists());
}

#[test]
fn file_without_exec_bit_is_launch_failure() {
    let _lock = serial();
    let root = tempdir().unwrap();
    let exe = script(root.path(), "vasp_std", "echo never");
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o644)).unwrap();
    let dir = workdir(root.path(), "calc");

    let outcome = Runner::new(CalculationRequest::new(&exe, &dir)).unwrap().run();

    assert_eq!(outcome.kind(), Some(FailureKind::LaunchFailed));
    assert_eq!(outcome.exit_code(), None);
    assert!(outcome.failure().unwrap().message.contains("Failed to spawn"));
    // the log is opened before the spawn and stays empty
    assert_eq!(fs::read_to_string(dir.join("output.log")).unwrap(), "");
}

#[test]
fn argv_without_parallel_launcher_ignores_cores() {
    let runner = Runner::new(CalculationRequest::new("vasp_gam", "calc").with_cores(8)).unwrap();

    assert_eq!(runner.argv(), vec![OsString::from("vasp_gam")]);
}

#[test]
fn argv_with_parallel_launcher() {
    let runner =
        Runner::new(CalculationRequest::new("vasp_std", "calc").with_parallel_launcher(4)).unwrap();

    assert_eq!(
        runner.argv(),
        ["mpirun", "-np", "4", "vasp_std"]
            .map(OsString::from)
            .to_vec()
    );

    let runner = runner.with_parallel_launcher("srun");
    assert_eq!(runner.argv()[0], OsString::from("srun"));
}

#[test]
fn parallel_launcher_wraps_executable() {
    let _lock = serial();
    let root = tempdir().unwrap();
    let launcher = script(root.path(), "fake-mpirun", "echo \"$@\"");
    let dir = workdir(root.path(), "calc");

    let outcome = Runner::new(CalculationRequest::new("vasp_std", &dir).with_parallel_launcher(2))
        .unwrap()
        .with_parallel_launcher(&launcher)
        .run();

    assert!(outcome.is_success());
    assert_eq!(
        fs::read_to_string(dir.join("output.log")).unwrap(),
        "-np 2 vasp_std\n"
    );
}

#[test]
fn invalid_requests_are_rejected() {
    assert_eq!(
        Runner::new(CalculationRequest::new("", "calc")).unwrap_err(),
        RequestError::EmptyExecutable
    );
    assert_eq!(
        Runner::new(CalculationRequest::new("vasp", "calc").with_parallel_launcher(0)).unwrap_err(),
        RequestError::ZeroCores
    );

    for log_name in ["", "../output.log", "logs/output.log", ".."] {
        assert_eq!(
            Runner::new(CalculationRequest::new("vasp", "calc").with_log_name(log_name))
                .unwrap_err(),
            RequestError::InvalidLogName(log_name.to_string())
        );
    }
}
