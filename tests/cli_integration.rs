//! CLI smoke tests for the foreman binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("foreman").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("report"));
}

#[test]
fn test_version() {
    let mut cmd = Command::cargo_bin("foreman").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_run_help_shows_loop_flags() {
    let mut cmd = Command::cargo_bin("foreman").unwrap();
    cmd.args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--max-iterations"))
        .stdout(predicate::str::contains("--retry-attempts"))
        .stdout(predicate::str::contains("--idle-policy"));
}

#[test]
fn test_run_with_missing_worker_fails_with_code_6() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("foreman").unwrap();
    cmd.args([
        "--state-dir",
        dir.path().join("state").to_str().unwrap(),
        "run",
        "--worker",
        "definitely-not-a-real-worker-7c2f",
        "--tracker",
        "definitely-not-a-real-tracker-7c2f",
    ])
    .assert()
    .failure()
    .code(6)
    .stderr(predicate::str::contains("Missing worker binary"));
}

#[test]
fn test_status_without_state_dir_fails() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("foreman").unwrap();
    cmd.args([
        "--state-dir",
        dir.path().join("nope").to_str().unwrap(),
        "status",
    ])
    .assert()
    .failure();
}
