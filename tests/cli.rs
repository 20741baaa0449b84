// Test intent: verifies the stockham-sweep binary end to end on the host
// simulator: flags, environment overrides, templates and exit codes.
use std::fs;

use assert_cmd::Command;
use stockham_cl::template::{ANGLE_PLACEHOLDER, BUILTIN_TEMPLATE};

const ANGLE_DEFINE: &str = "#define MINUS_PI_OVER_N_GLOBAL_BUTTERFLIES";

fn sweep() -> Command {
    let mut cmd = Command::cargo_bin("stockham-sweep").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("STOCKHAM_CL_MAX_SIZE")
        .env_remove("STOCKHAM_CL_ITERATIONS");
    cmd
}

fn rows(stdout: &[u8], status: &str) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| l.trim_end().ends_with(status))
        .map(str::to_string)
        .collect()
}

/// Builtin template whose angle define ignores the substituted value, so
/// every twiddle is wrong while the template itself stays valid.
fn wrong_angle_template() -> String {
    BUILTIN_TEMPLATE.replace(
        &format!("{ANGLE_DEFINE} {ANGLE_PLACEHOLDER}"),
        &format!("{ANGLE_DEFINE} 0x1p-1f\n// {ANGLE_PLACEHOLDER}"),
    )
}

#[test]
fn host_sweep_prints_one_row_per_size() {
    let assert = sweep()
        .args(["--device", "host", "--max-size", "64", "--iterations", "3"])
        .assert()
        .success();
    let ok = rows(&assert.get_output().stdout, "ok");
    assert_eq!(ok.len(), 3, "{ok:?}");
    assert!(ok[0].trim_start().starts_with('8'));
}

#[test]
fn environment_supplies_defaults() {
    let assert = sweep()
        .env("STOCKHAM_CL_MAX_SIZE", "32")
        .env("STOCKHAM_CL_ITERATIONS", "2")
        .assert()
        .success();
    assert_eq!(rows(&assert.get_output().stdout, "ok").len(), 2);
}

#[test]
fn unparsable_environment_fails() {
    sweep()
        .env("STOCKHAM_CL_ITERATIONS", "many")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn no_verify_skips_checks() {
    let assert = sweep()
        .args(["--max-size", "32", "--iterations", "1", "--no-verify"])
        .assert()
        .success();
    assert_eq!(rows(&assert.get_output().stdout, "skipped").len(), 2);
}

#[test]
fn template_file_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kernel.cl");
    fs::write(&path, BUILTIN_TEMPLATE).unwrap();
    sweep()
        .args(["--max-size", "32", "--iterations", "1", "--template"])
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn template_missing_a_placeholder_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kernel.cl");
    fs::write(
        &path,
        BUILTIN_TEMPLATE.replace(
            "#define N_LOCAL_BUTTERFLIES replace_N_LOCAL_BUTTERFLIES",
            "#define N_LOCAL_BUTTERFLIES 1",
        ),
    )
    .unwrap();
    let assert = sweep()
        .args(["--max-size", "32", "--template"])
        .arg(&path)
        .assert()
        .failure()
        .code(1);
    let output = assert.get_output();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("replace_N_LOCAL_BUTTERFLIES"), "{stderr}");
}

#[test]
fn mismatch_is_reported_but_not_fatal_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wrong.cl");
    fs::write(&path, wrong_angle_template()).unwrap();
    let assert = sweep()
        .args(["--max-size", "32", "--iterations", "1", "--template"])
        .arg(&path)
        .assert()
        .success();
    assert_eq!(rows(&assert.get_output().stdout, "MISMATCH").len(), 2);
}

#[test]
fn fail_on_mismatch_sets_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wrong.cl");
    fs::write(&path, wrong_angle_template()).unwrap();
    sweep()
        .args([
            "--max-size",
            "32",
            "--iterations",
            "1",
            "--fail-on-mismatch",
            "--template",
        ])
        .arg(&path)
        .assert()
        .failure()
        .code(1);
}

#[test]
fn small_host_local_memory_stops_cleanly() {
    let assert = sweep()
        .args([
            "--max-size",
            "4096",
            "--iterations",
            "1",
            "--host-local-mem",
            "4096",
        ])
        .assert()
        .success();
    let output = assert.get_output();
    let stdout = String::from_utf8_lossy(&output.stdout);
    // 4 KiB holds the ping-pong buffers up to n = 256.
    assert_eq!(rows(&output.stdout, "ok").len(), 6);
    assert!(stdout.contains("InsufficientLocalMemory"), "{stdout}");
}

#[test]
fn invalid_bounds_fail() {
    sweep()
        .args(["--min-size", "12"])
        .assert()
        .failure()
        .code(1);
}

#[cfg(not(feature = "opencl"))]
#[test]
fn opencl_device_needs_the_feature() {
    let assert = sweep()
        .args(["--device", "opencl", "--max-size", "16"])
        .assert()
        .failure();
    let output = assert.get_output();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--features opencl"), "{stderr}");
}
