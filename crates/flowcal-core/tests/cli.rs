//! CLI E2E tests.
//!
//! Validates:
//! - `calibrate` writes per-iteration offsets and the statistics table
//! - `calibrate` resumes from persisted offsets
//! - `validate-config` reports defaults and rejects invalid files with exit 10
//! - `inspect-offsets` and `show-stats` read back what `calibrate` wrote
//! - malformed inputs map to their exit codes

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

// ============================================================================
// Helpers
// ============================================================================

fn flowcal() -> Command {
    let mut cmd = cargo_bin_cmd!("flowcal-core");
    cmd.timeout(Duration::from_secs(60));
    cmd.env_remove("FLOWCAL_CONFIG");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_inputs(dir: &Path) {
    fs::write(
        dir.join("config.json"),
        r#"{"useBruteForce": true, "preparatoryIterations": 0, "minFlowStdDev": 8}"#,
    )
    .unwrap();
    fs::write(
        dir.join("counts.tsv"),
        "# entity\tbin\tvalue\nstop1\t6\t4\nstop2\t6\t1\nstop6\t6\t2\nstop10\t6\t5\n",
    )
    .unwrap();
    let mut events = String::new();
    for agent in 1..=4 {
        events.push_str(&format!("stop1\t{}\nstop10\t{}\n", 21_600 + agent, 22_200 + agent));
    }
    fs::write(dir.join("it0.tsv"), &events).unwrap();
    fs::write(dir.join("it1.tsv"), &events).unwrap();
}

fn stdout_json(assert: assert_cmd::assert::Assert) -> Value {
    let output = assert.get_output().stdout.clone();
    serde_json::from_slice(&output).expect("parse JSON")
}

// ============================================================================
// calibrate
// ============================================================================

#[test]
fn test_calibrate_writes_offsets_and_stats() {
    let dir = tempdir().unwrap();
    write_inputs(dir.path());
    let out = dir.path().join("out");

    let json = stdout_json(
        flowcal()
            .current_dir(dir.path())
            .args([
                "--config",
                "config.json",
                "calibrate",
                "--counts",
                "counts.tsv",
                "--events",
                "it0.tsv",
                "--events",
                "it1.tsv",
                "--output",
            ])
            .arg(&out)
            .assert()
            .success()
            .code(0),
    );

    let iterations = json["iterations"].as_array().expect("iterations array");
    assert_eq!(iterations.len(), 2);
    let first = &iterations[0];
    assert_eq!(first["phase"], "active");
    assert_eq!(first["events_recorded"], 8);
    let count_ll = first["statistics"]["count_ll"].as_f64().unwrap();
    assert!((count_ll - -0.046_875).abs() < 1e-12);
    assert!(first["statistics"]["count_ll_pred_err"].is_null());
    assert!(json["run_id"].as_str().unwrap().starts_with("cal-"));

    assert!(out.join("ITERS/it.0/0.costOffsets.jsonl").exists());
    assert!(out.join("ITERS/it.1/1.costOffsets.jsonl").exists());
    let table = fs::read_to_string(out.join("calibration-stats.tsv")).unwrap();
    assert_eq!(table.lines().count(), 3);
    assert!(table.starts_with("iteration\tcount_ll\tcount_ll_pred_err"));
}

#[test]
fn test_calibrate_resumes_from_offsets() {
    let dir = tempdir().unwrap();
    write_inputs(dir.path());
    let out = dir.path().join("out");
    flowcal()
        .current_dir(dir.path())
        .args(["--config", "config.json", "calibrate", "--counts", "counts.tsv"])
        .args(["--events", "it0.tsv", "--output"])
        .arg(&out)
        .assert()
        .success();

    let json = stdout_json(
        flowcal()
            .current_dir(dir.path())
            .args(["--config", "config.json", "calibrate", "--counts", "counts.tsv"])
            .args(["--events", "it1.tsv", "--first-iteration", "1", "--offsets-in"])
            .arg(out.join("ITERS/it.0/0.costOffsets.jsonl"))
            .assert()
            .success(),
    );
    assert_eq!(json["iterations"][0]["iteration"], 1);
    assert_eq!(json["final_offset_entities"], 3);
}

#[test]
fn test_calibrate_missing_counts_is_io_error() {
    let dir = tempdir().unwrap();
    write_inputs(dir.path());
    flowcal()
        .current_dir(dir.path())
        .args(["calibrate", "--counts", "absent.tsv", "--events", "it0.tsv"])
        .assert()
        .failure()
        .code(14)
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_calibrate_malformed_events_is_input_error() {
    let dir = tempdir().unwrap();
    write_inputs(dir.path());
    fs::write(dir.path().join("bad.tsv"), "stop1\tsix o'clock\n").unwrap();
    flowcal()
        .current_dir(dir.path())
        .args(["calibrate", "--counts", "counts.tsv", "--events", "bad.tsv"])
        .assert()
        .failure()
        .code(11)
        .stderr(predicate::str::contains("bad.tsv:1"));
}

#[test]
fn test_calibrate_iteration_numbers_past_u32_max_rejected() {
    let dir = tempdir().unwrap();
    write_inputs(dir.path());
    flowcal()
        .current_dir(dir.path())
        .args([
            "calibrate", "--counts", "counts.tsv", "--first-iteration", "4294967295",
            "--events", "it0.tsv", "--events", "it1.tsv", "--output", "out",
        ])
        .assert()
        .failure()
        .code(11)
        .stderr(predicate::str::contains("iteration range"));
    assert!(!dir.path().join("out/calibration-stats.tsv").exists());

    let summary = stdout_json(
        flowcal()
            .current_dir(dir.path())
            .args([
                "calibrate", "--counts", "counts.tsv", "--first-iteration", "4294967295",
                "--events", "it0.tsv",
            ])
            .assert()
            .success(),
    );
    assert_eq!(summary["iterations"][0]["iteration"], 4_294_967_295u64);
}

#[test]
fn test_calibrate_corrupt_offsets_is_state_error() {
    let dir = tempdir().unwrap();
    write_inputs(dir.path());
    fs::write(dir.path().join("prior.jsonl"), "not json\n").unwrap();
    flowcal()
        .current_dir(dir.path())
        .args(["calibrate", "--counts", "counts.tsv", "--events", "it0.tsv"])
        .args(["--offsets-in", "prior.jsonl"])
        .assert()
        .failure()
        .code(13);
}

// ============================================================================
// validate-config
// ============================================================================

#[test]
fn test_validate_config_defaults() {
    let dir = tempdir().unwrap();
    let json = stdout_json(
        flowcal()
            .current_dir(dir.path())
            .arg("validate-config")
            .assert()
            .success(),
    );
    assert_eq!(json["valid"], true);
    assert!(json["source"].is_null());
    assert_eq!(json["bin_count"], 24);
    assert_eq!(json["config"]["timeBinSize"], 3600);
}

#[test]
fn test_validate_config_from_env() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.toml");
    fs::write(&path, "timeBinSize = 900\n").unwrap();
    let json = stdout_json(
        flowcal()
            .env("FLOWCAL_CONFIG", &path)
            .arg("validate-config")
            .assert()
            .success(),
    );
    assert_eq!(json["bin_count"], 96);
}

#[test]
fn test_validate_config_rejects_bad_bin_size() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.json");
    fs::write(&path, r#"{"timeBinSize": 7000}"#).unwrap();
    flowcal()
        .arg("--config")
        .arg(&path)
        .arg("validate-config")
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("timeBinSize"));
}

// ============================================================================
// inspect-offsets / show-stats
// ============================================================================

#[test]
fn test_inspect_and_show_read_back_outputs() {
    let dir = tempdir().unwrap();
    write_inputs(dir.path());
    let out = dir.path().join("out");
    flowcal()
        .current_dir(dir.path())
        .args(["--config", "config.json", "calibrate", "--counts", "counts.tsv"])
        .args(["--events", "it0.tsv", "--output"])
        .arg(&out)
        .assert()
        .success();

    let summary = stdout_json(
        flowcal()
            .arg("inspect-offsets")
            .arg(out.join("ITERS/it.0/0.costOffsets.jsonl"))
            .args(["--top", "1"])
            .assert()
            .success(),
    );
    assert_eq!(summary["nonzero_cells"], 3);
    assert_eq!(summary["largest"][0]["entity"], "stop6");
    assert_eq!(summary["largest"][0]["bin"], 6);

    let rows = stdout_json(
        flowcal()
            .arg("show-stats")
            .arg(out.join("calibration-stats.tsv"))
            .assert()
            .success(),
    );
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert!(rows[0]["p2p_ll"].is_null());
}

#[test]
fn test_json_logs_go_to_stderr() {
    let dir = tempdir().unwrap();
    flowcal()
        .current_dir(dir.path())
        .args(["--log-format", "json", "-v", "validate-config"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{"));
}
