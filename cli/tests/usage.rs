//! Integration test: the `perfstack` binary's usage paths

use std::process::Command;

fn perfstack() -> Command {
    Command::new(env!("CARGO_BIN_EXE_perfstack"))
}

#[test]
fn test_missing_script_prints_usage_and_succeeds() {
    let output = perfstack().output().unwrap();

    assert!(output.status.success(), "status: {}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"), "stdout: {}", stdout);
    assert!(stdout.contains("SCRIPT"));
}

#[test]
fn test_out_of_range_interval_is_a_usage_error() {
    let output = perfstack().args(["-s", "1e300", "job.py"]).output().unwrap();

    // clap's usage error status, not a panic
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("out of range"), "stderr: {}", stderr);
    assert!(!stderr.contains("panicked"));
}
