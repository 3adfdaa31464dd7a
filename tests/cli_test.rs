//! Command-line smoke tests

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_start_command() {
    Command::cargo_bin("ipfs-launcher")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"));
}

#[test]
fn test_start_help_lists_options() {
    Command::cargo_bin("ipfs-launcher")
        .unwrap()
        .args(["start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--snapshot-policy"))
        .stdout(predicate::str::contains("--registry-url"))
        .stdout(predicate::str::contains("--network"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("ipfs-launcher")
        .unwrap()
        .args(["start", "--config"])
        .arg(dir.path().join("missing.toml"))
        .assert()
        .failure();
}

#[test]
fn test_unknown_default_network_fails() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("ipfs-launcher")
        .unwrap()
        .args(["start", "--default-network", "kovan", "--data-dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("kovan"));
}

#[test]
fn test_invalid_snapshot_policy_rejected() {
    Command::cargo_bin("ipfs-launcher")
        .unwrap()
        .args(["start", "--snapshot-policy", "newest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("newest"));
}
