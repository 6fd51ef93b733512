//! Integration tests for the `ignite status`, `disk` and `reset` commands.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A command running in `dir` with its state under `dir/state`.
fn ignite(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ignite").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("IGNITION_CONFIG")
        .env_remove("IGNITION_STATE_DIR")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .arg("--state-dir")
        .arg(dir.path().join("state"));
    cmd
}

/// A snapshot naming a control plane whose bundle was never written.
const PARTIAL_SNAPSHOT: &str = r#"{
  "cluster_endpoint": "https://10.0.0.2:6443",
  "node_records": {
    "u1": {
      "identity_key": "u1",
      "role": "control_plane",
      "hostname": "controlplane-0",
      "mac": "aa:bb",
      "address": "10.0.0.2",
      "rendered_config": "",
      "first_seen_at": "2026-01-01T00:00:00Z"
    }
  },
  "bootstrapped": false
}"#;

fn write_partial_snapshot(dir: &TempDir) {
    let state = dir.path().join("state");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(state.join("bootstrap-state.json"), PARTIAL_SNAPSHOT).unwrap();
}

#[test]
fn test_status_without_state() {
    let temp_dir = TempDir::new().unwrap();
    ignite(&temp_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ignition Status"))
        .stdout(predicate::str::contains("No saved state"));
}

#[test]
fn test_status_json_without_state() {
    let temp_dir = TempDir::new().unwrap();
    let assert = ignite(&temp_dir).arg("status").arg("--json").assert().success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("status --json should print JSON");
    assert_eq!(json["saved"], false);
    assert_eq!(json["bootstrapped"], false);
    assert_eq!(json["nodes"].as_array().unwrap().len(), 0);
}

#[test]
fn test_disk_is_recorded_and_shown() {
    let temp_dir = TempDir::new().unwrap();
    ignite(&temp_dir)
        .args(["disk", "4c4c4544-0042", "/dev/nvme0n1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/dev/nvme0n1"));

    let assert = ignite(&temp_dir).arg("status").arg("--json").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["saved"], true);
    assert_eq!(json["machine_disks"]["4c4c4544-0042"], "/dev/nvme0n1");
}

#[test]
fn test_disk_rejects_non_device_path() {
    let temp_dir = TempDir::new().unwrap();
    ignite(&temp_dir)
        .args(["disk", "u1", "sda"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("device path"));
    assert!(!temp_dir.path().join("state").join("bootstrap-state.json").exists());
}

#[test]
fn test_reset_without_state() {
    let temp_dir = TempDir::new().unwrap();
    ignite(&temp_dir)
        .arg("reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to reset"));
}

#[test]
fn test_reset_force_deletes_state() {
    let temp_dir = TempDir::new().unwrap();
    ignite(&temp_dir).args(["disk", "u1", "/dev/sdb"]).assert().success();
    let snapshot = temp_dir.path().join("state").join("bootstrap-state.json");
    assert!(snapshot.exists());

    ignite(&temp_dir)
        .args(["reset", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved state deleted"));
    assert!(!snapshot.exists());
}

#[test]
fn test_partial_state_is_fatal_until_reset() {
    let temp_dir = TempDir::new().unwrap();
    write_partial_snapshot(&temp_dir);

    ignite(&temp_dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load state"))
        .stderr(predicate::str::contains("ignite reset"));

    ignite(&temp_dir)
        .args(["run", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("incomplete"));

    ignite(&temp_dir).args(["reset", "--force"]).assert().success();
    ignite(&temp_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No saved state"));
}
