//! CLI integration tests for armsync
//!
//! Tests the armsync CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command with an isolated config directory
#[allow(deprecated)]
fn armsync_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("armsync").unwrap();
    cmd.env("ARMSYNC_CONFIG_DIR", config_dir.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_config_path_uses_env_dir() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"))
        .stdout(predicate::str::contains(
            dir.path().to_string_lossy().as_ref(),
        ));
}

#[test]
fn test_config_show_defaults() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[workers]"))
        .stdout(predicate::str::contains("count = 4"))
        .stdout(predicate::str::contains("warning_utilization = 0.8"));
}

#[test]
fn test_config_init_writes_file_once() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default configuration"));
    assert!(dir.path().join("config.toml").exists());

    armsync_cmd(&dir)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    armsync_cmd(&dir)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_config_set_and_get() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .args(["config", "set", "workers.count", "6"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set workers.count = 6"));

    armsync_cmd(&dir)
        .args(["config", "get", "workers.count"])
        .assert()
        .success()
        .stdout(predicate::str::diff("6\n"));

    armsync_cmd(&dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("workers.count = 6"));
}

#[test]
fn test_config_set_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .args(["config", "set", "workers.count", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers.count must be at least 1"));

    armsync_cmd(&dir)
        .args(["config", "get", "robot.ip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_invalid_config_file_is_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "[workers]\ncount = 0\n").unwrap();

    armsync_cmd(&dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers.count"));
}

#[test]
fn test_demo_deadlock() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .args(["--format", "json", "demo", "deadlock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"error_code\": \"E300\""))
        .stdout(predicate::str::contains("\"other_thread_completed\": true"));
}

#[test]
fn test_demo_priority_order() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .args(["demo", "priority"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Submitted: LOW, CRITICAL, NORMAL"))
        .stdout(predicate::str::contains("Executed:  CRITICAL, NORMAL, LOW"));
}

#[test]
fn test_demo_resources_read_cap() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .args(["demo", "resources", "--readers", "5", "--max", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 granted, 2 refused"));
}

#[test]
fn test_stress_json_summary() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .args([
            "--format", "json", "stress", "--tasks", "30", "--workers", "2", "--threads", "3",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"tasks\": 30"))
        .stdout(predicate::str::contains("\"failed\": 0"))
        .stdout(predicate::str::contains("\"workers\": 2"));
}

#[test]
fn test_status_reports_health() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] thread_manager"))
        .stdout(predicate::str::contains("[OK] resource_manager"));
}

#[test]
fn test_quiet_and_verbose_conflict() {
    let dir = TempDir::new().unwrap();
    armsync_cmd(&dir)
        .args(["--quiet", "--verbose", "status"])
        .assert()
        .failure();
}
