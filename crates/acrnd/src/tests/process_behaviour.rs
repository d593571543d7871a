//! Behavioural tests covering supervisor process supervision and runtime files.

use std::cell::RefCell;
use std::fs;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::process::{LaunchError, LaunchMode};
use crate::tests::support::{ProcessTestWorld, StepResult, snapshot_status};

#[fixture]
fn world() -> RefCell<ProcessTestWorld> {
    RefCell::new(ProcessTestWorld::new())
}

#[given("a fresh supervisor process world")]
fn given_world(world: &RefCell<ProcessTestWorld>) {
    let _ = world;
}

#[given("{count} persisted machines")]
fn given_persisted_machines(world: &RefCell<ProcessTestWorld>, count: usize) {
    world.borrow_mut().persist_machines(count);
}

#[given("stale runtime artefacts recording pid {pid}")]
fn given_stale_runtime(world: &RefCell<ProcessTestWorld>, pid: u32) -> StepResult {
    world.borrow().write_stale_runtime(pid)
}

#[when("the supervisor starts in background mode")]
fn when_starts_background(world: &RefCell<ProcessTestWorld>) -> StepResult {
    world.borrow_mut().start_background()?;
    world.borrow().wait_for_status("ready")
}

#[when("the supervisor starts in foreground mode")]
fn when_starts_foreground(world: &RefCell<ProcessTestWorld>) -> StepResult {
    world
        .borrow_mut()
        .start_foreground(LaunchMode::Foreground, true)
}

#[when("the supervisor starts with invalid configuration")]
fn when_starts_with_invalid_config(world: &RefCell<ProcessTestWorld>) -> StepResult {
    world.borrow_mut().start_foreground_with_invalid_config()
}

#[when("shutdown is triggered")]
fn when_shutdown_triggered(world: &RefCell<ProcessTestWorld>) {
    world.borrow().trigger_shutdown();
}

#[when("the supervisor run completes")]
fn when_run_completes(world: &RefCell<ProcessTestWorld>) -> StepResult {
    world.borrow_mut().join_background()
}

#[then("daemonisation was requested")]
fn then_daemonised(world: &RefCell<ProcessTestWorld>) {
    assert_eq!(world.borrow().daemonizer_calls(), 1);
}

#[then("daemonisation was not requested")]
fn then_not_daemonised(world: &RefCell<ProcessTestWorld>) {
    assert_eq!(world.borrow().daemonizer_calls(), 0);
}

#[then("the supervisor wrote the lock file")]
fn then_lock_file_exists(world: &RefCell<ProcessTestWorld>) {
    assert!(
        world.borrow().lock_path().exists(),
        "lock file should exist whilst the supervisor runs"
    );
}

#[then("the supervisor lock file is absent")]
fn then_lock_file_absent(world: &RefCell<ProcessTestWorld>) {
    assert!(!world.borrow().lock_path().exists());
}

#[then("the supervisor wrote the pid file")]
fn then_pid_file_exists(world: &RefCell<ProcessTestWorld>) {
    let content = fs::read_to_string(world.borrow().pid_path()).expect("pid file should be readable");
    let pid: u32 = content
        .trim()
        .parse()
        .expect("pid file should contain an integer");
    assert_eq!(pid, std::process::id(), "pid file should record this process");
}

#[then("the health snapshot reports ready with {count} machines")]
fn then_health_ready(world: &RefCell<ProcessTestWorld>, count: u64) {
    let snapshot = world
        .borrow()
        .read_health()
        .expect("health snapshot should parse");
    assert_eq!(snapshot_status(&snapshot), "ready");
    assert_eq!(snapshot["machines"].as_u64(), Some(count));
}

#[then("the runtime artefacts are removed")]
fn then_runtime_removed(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    for path in [world.lock_path(), world.pid_path(), world.health_path()] {
        assert!(!path.exists(), "{} should be removed", path.display());
    }
}

#[then("starting the supervisor again fails with already running")]
fn then_second_start_refused(world: &RefCell<ProcessTestWorld>) {
    world
        .borrow_mut()
        .start_foreground(LaunchMode::Foreground, false)
        .expect("foreground start should complete");
    let binding = world.borrow();
    let error = binding
        .last_error()
        .expect("expected a launch error when starting a second supervisor");
    match error {
        LaunchError::AlreadyRunning { pid } => {
            assert_eq!(*pid, std::process::id(), "pid should match this process");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[then("the supervisor run succeeds")]
fn then_run_succeeds(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    let result = world.last_result().expect("expected a recorded result");
    assert!(result.is_ok(), "supervisor run should succeed: {result:?}");
}

#[then("the launch fails with a configuration error")]
fn then_config_error(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    let error = world.last_error().expect("expected a launch error");
    assert!(matches!(error, LaunchError::Config { .. }), "unexpected error: {error}");
}

#[scenario(
    path = "tests/features/daemon_process.feature",
    name = "Background launch publishes runtime artefacts"
)]
fn background_launch(world: RefCell<ProcessTestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/daemon_process.feature",
    name = "Foreground launch skips daemonisation"
)]
fn foreground_launch(world: RefCell<ProcessTestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/daemon_process.feature",
    name = "A second supervisor is refused while the first runs"
)]
fn second_supervisor_refused(world: RefCell<ProcessTestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/daemon_process.feature",
    name = "Stale runtime files are recovered"
)]
fn stale_runtime_recovered(world: RefCell<ProcessTestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/daemon_process.feature",
    name = "Invalid configuration aborts the launch"
)]
fn invalid_configuration(world: RefCell<ProcessTestWorld>) {
    drop(world);
}
