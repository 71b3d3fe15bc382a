//! End-to-end CLI tests for the causelist binary.
//!
//! These cover argument handling and the failures reported before any
//! browser is launched.

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Binary with an isolated config home, so no user config is picked up.
fn causelist(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("causelist").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    causelist(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Retrieve court cause lists"))
        .stdout(predicate::str::contains("--court"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    causelist(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("causelist"));
}

/// Test that a court or --all is required.
#[test]
fn test_binary_requires_court_choice() {
    let home = TempDir::new().unwrap();
    causelist(&home)
        .args(["--date", "01-03-2024"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--court"));
}

/// Test that --court and --all conflict.
#[test]
fn test_binary_rejects_court_and_all_together() {
    let home = TempDir::new().unwrap();
    causelist(&home)
        .args(["--court", "Delhi HC", "--all", "--date", "01-03-2024"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

/// Test that --from needs --to.
#[test]
fn test_binary_range_requires_both_ends() {
    let home = TempDir::new().unwrap();
    causelist(&home)
        .args(["--court", "Delhi HC", "--from", "01-03-2024"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--to"));
}

/// Test that an unparseable date fails before a browser is needed.
#[test]
fn test_binary_invalid_date_fails() {
    let home = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    causelist(&home)
        .args(["--court", "Delhi HC", "--date", "31-02-2024", "-q", "-o"])
        .arg(output.path().join("out"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid date '31-02-2024'"));
    assert!(!output.path().join("out").exists());
}

/// Test that an unknown case type fails.
#[test]
fn test_binary_unknown_case_type_fails() {
    let home = TempDir::new().unwrap();
    causelist(&home)
        .args(["--court", "Delhi HC", "--date", "01-03-2024", "--case", "tax"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown case type 'tax'"));
}

/// Test that a date far in the future is refused by the date window.
#[test]
fn test_binary_out_of_window_date_fails() {
    let home = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    causelist(&home)
        .args(["--court", "Delhi HC", "--date", "2999-01-01", "-q", "-o"])
        .arg(output.path().join("out"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("latest supported date"));
    assert!(!output.path().join("out").exists());
}

/// Test that an explicit config file that does not exist is an error.
#[test]
fn test_binary_missing_config_file_fails() {
    let home = TempDir::new().unwrap();
    causelist(&home)
        .args(["--court", "Delhi HC", "--date", "01-03-2024", "--config"])
        .arg(home.path().join("absent.toml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to read config file"));
}

/// Test that an out-of-range config value is reported.
#[test]
fn test_binary_invalid_config_value_fails() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join("causelist");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[limits]\nmax_sessions = 0\n",
    )
    .unwrap();

    causelist(&home)
        .args(["--court", "Delhi HC", "--date", "01-03-2024"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("max_sessions"));
}

/// Test that numeric flags are range-checked by clap.
#[test]
fn test_binary_rejects_out_of_range_workers() {
    let home = TempDir::new().unwrap();
    causelist(&home)
        .args(["--court", "Delhi HC", "--date", "01-03-2024", "-w", "0"])
        .assert()
        .failure()
        .code(2);
}
