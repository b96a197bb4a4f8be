//! `hub-enginectl` CLI integration tests, outside-in via a spawned process.

use std::process::Command;
use test_log::test;

#[test]
fn version_flag_returns_success() {
    let output = Command::new("cargo")
        .args(["run", "--bin", "hub-enginectl", "--", "--version"])
        .output()
        .expect("failed to execute hub-enginectl");

    assert!(output.status.success(), "--version should exit successfully");
}

#[test]
fn help_flag_returns_success() {
    let output = Command::new("cargo")
        .args(["run", "--bin", "hub-enginectl", "--", "--help"])
        .output()
        .expect("failed to execute hub-enginectl");

    assert!(output.status.success(), "--help should exit successfully");
}

#[test]
fn invalid_subcommand_produces_helpful_error_message() {
    let output = Command::new("cargo")
        .args(["run", "--bin", "hub-enginectl", "--", "frobnicate"])
        .output()
        .expect("failed to execute hub-enginectl");

    let stderr_text = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr_text.contains("unrecognized subcommand 'frobnicate'"),
        "stderr should name the bad subcommand. Actual stderr: {stderr_text}"
    );
}

#[test]
fn status_without_a_running_engine_fails_with_connection_error() {
    let output = Command::new("cargo")
        .args([
            "run",
            "--bin",
            "hub-enginectl",
            "--",
            "--engine-url",
            "http://127.0.0.1:1",
            "status",
            "clinic-a",
        ])
        .output()
        .expect("failed to execute hub-enginectl");

    assert!(!output.status.success(), "status against an unreachable engine should fail");
}
