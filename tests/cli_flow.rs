//! End-to-end CLI flow: demo data -> train -> inspect -> score -> explain -> report.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const LOGIN_13: &str = "/login:latency_p95_ms:hour=13";

fn baseline() -> Command {
    let mut cmd = Command::cargo_bin("baseline").unwrap();
    cmd.env_remove("BASELINE_CONFIG")
        .env_remove("BASELINE_DB")
        .env("RUST_LOG", "warn");
    cmd
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap()
}

struct Workspace {
    _dir: TempDir,
    train: PathBuf,
    score: PathBuf,
    db: PathBuf,
    root: PathBuf,
}

/// Three hourly training days and one scoring day with the incident at 13:00.
fn demo_workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let train = root.join("train.csv");
    let score = root.join("score.csv");
    let db = root.join("baselines.db");

    baseline()
        .args([
            "demo",
            "--train-out",
            path_str(&train),
            "--score-out",
            path_str(&score),
            "--start",
            "2026-01-01T00:00:00",
            "--train-days",
            "3",
            "--score-days",
            "1",
            "--interval-minutes",
            "60",
            "--seed",
            "7",
        ])
        .assert()
        .success();

    Workspace {
        _dir: dir,
        train,
        score,
        db,
        root,
    }
}

fn trained_workspace() -> Workspace {
    let ws = demo_workspace();
    baseline()
        .args([
            "train",
            "--input",
            path_str(&ws.train),
            "--db",
            path_str(&ws.db),
            "--min-samples",
            "3",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Trained 72 baselines"));
    ws
}

#[test]
fn test_demo_writes_both_csvs() {
    let ws = demo_workspace();
    for path in [&ws.train, &ws.score] {
        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("timestamp,entity_id,metric,value\n"));
    }
    // 3 days x 24 hours x 3 endpoints
    assert_eq!(fs::read_to_string(&ws.train).unwrap().lines().count(), 1 + 216);
    assert_eq!(fs::read_to_string(&ws.score).unwrap().lines().count(), 1 + 72);
}

#[test]
fn test_train_then_score_prints_json_lines() {
    let ws = trained_workspace();

    let output = baseline()
        .args([
            "score",
            "--input",
            path_str(&ws.score),
            "--db",
            path_str(&ws.db),
            "--min-samples",
            "3",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 72);

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert!(first["event"]["entity_id"].is_string());
    assert!(first["baseline"]["key"]["entity_id"].is_string());
    assert_eq!(first["baseline"]["version"], 1);
    assert!(first["score"].is_number());
}

#[test]
fn test_score_only_anomalies_filters() {
    let ws = trained_workspace();

    let output = baseline()
        .args([
            "score",
            "--input",
            path_str(&ws.score),
            "--db",
            path_str(&ws.db),
            "--only-anomalies",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    for line in String::from_utf8(output).unwrap().lines() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["is_anomaly"], true);
    }
}

#[test]
fn test_keys_list_show() {
    let ws = trained_workspace();

    baseline()
        .args(["keys", "--db", path_str(&ws.db)])
        .assert()
        .success()
        .stdout(predicate::str::contains(LOGIN_13));

    baseline()
        .args(["list", "--db", path_str(&ws.db)])
        .assert()
        .success()
        .stdout(predicate::str::contains(LOGIN_13));

    baseline()
        .args(["show", "--db", path_str(&ws.db), "--key", LOGIN_13])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"median\""))
        .stdout(predicate::str::contains("\"mad\""))
        .stdout(predicate::str::contains("\"sample_count\": 3"));
}

#[test]
fn test_show_missing_key_fails() {
    let ws = trained_workspace();
    baseline()
        .args(["show", "--db", path_str(&ws.db), "--key", "nope:nothing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no baseline stored"));
}

#[test]
fn test_explain_incident_event() {
    let ws = trained_workspace();
    baseline()
        .args([
            "explain",
            "--input",
            path_str(&ws.score),
            "--db",
            path_str(&ws.db),
            "--timestamp",
            "2026-01-04T13:00:00",
            "--entity",
            "/login",
            "--metric",
            "latency_p95_ms",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Derived key: /login:latency_p95_ms:hour=13"))
        .stdout(predicate::str::contains("Baseline:"))
        .stdout(predicate::str::contains("Score:"));
}

#[test]
fn test_explain_unknown_event_fails() {
    let ws = trained_workspace();
    baseline()
        .args([
            "explain",
            "--input",
            path_str(&ws.score),
            "--db",
            path_str(&ws.db),
            "--timestamp",
            "1999-01-01T00:00:00",
            "--entity",
            "/login",
            "--metric",
            "latency_p95_ms",
        ])
        .assert()
        .failure();
}

#[test]
fn test_report_writes_markdown() {
    let ws = trained_workspace();
    let out = ws.root.join("out/report.md");

    baseline()
        .args([
            "report",
            "--input",
            path_str(&ws.score),
            "--db",
            path_str(&ws.db),
            "--out",
            path_str(&out),
            "--top",
            "5",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote report"));

    let md = fs::read_to_string(&out).unwrap();
    assert!(md.contains("# Baseline Engine Report"));
    assert!(md.contains("## Coverage"));
    assert!(md.contains("- Total events: **72**"));
    assert!(md.contains("## Top anomalies"));
}

#[test]
fn test_invalid_override_is_rejected() {
    let ws = demo_workspace();
    baseline()
        .args([
            "train",
            "--input",
            path_str(&ws.train),
            "--db",
            path_str(&ws.db),
            "--mad-threshold",
            "0",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mad_threshold"));
}

#[test]
fn test_config_file_is_applied() {
    let ws = demo_workspace();
    let config = ws.root.join("baseline.toml");
    fs::write(&config, "use_hour_of_day = false\nmin_samples = 3\n").unwrap();

    baseline()
        .args([
            "--config",
            path_str(&config),
            "train",
            "--input",
            path_str(&ws.train),
            "--db",
            path_str(&ws.db),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Trained 3 baselines"));

    baseline()
        .args(["keys", "--db", path_str(&ws.db)])
        .assert()
        .success()
        .stdout(predicate::str::contains("/login:latency_p95_ms\n"));
}

#[test]
fn test_read_commands_require_existing_db() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("typo.db");

    for args in [
        vec!["keys", "--db", path_str(&missing)],
        vec!["list", "--db", path_str(&missing)],
        vec!["show", "--db", path_str(&missing), "--key", LOGIN_13],
    ] {
        baseline()
            .args(&args)
            .assert()
            .failure()
            .stderr(predicate::str::contains("baseline database not found"));
    }
    assert!(!missing.exists());
}

#[test]
fn test_demo_rejects_bad_window() {
    let dir = tempfile::tempdir().unwrap();
    let train = dir.path().join("train.csv");
    let score = dir.path().join("score.csv");

    baseline()
        .args([
            "demo",
            "--train-out",
            path_str(&train),
            "--score-out",
            path_str(&score),
            "--interval-minutes",
            "0",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("interval_minutes must be positive"));

    baseline()
        .args([
            "demo",
            "--train-out",
            path_str(&train),
            "--score-out",
            path_str(&score),
            "--train-days",
            "100000000",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}
