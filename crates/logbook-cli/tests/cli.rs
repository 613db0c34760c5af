use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_log(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

fn sample_log(dir: &Path, name: &str, lr: f64) -> PathBuf {
    let config = format!(
        r#"{{"logbook_id":"0","logbook_type":"config","lr":{lr},"optimizer":"adam"}}"#
    );
    write_log(
        dir,
        name,
        &[
            &config,
            r#"{"logbook_id":"0","logbook_type":"metric","loss":0.9,"step":1}"#,
            r#"{"logbook_id":"0","logbook_type":"metric","loss":0.5,"step":2}"#,
            r#"{"logbook_id":"0","logbook_type":"message","message":"done"}"#,
        ],
    )
}

fn logbook() -> Command {
    Command::cargo_bin("logbook").unwrap()
}

#[test]
fn test_inspect_shows_config_and_counts() {
    let tmp = TempDir::new().unwrap();
    let log = sample_log(tmp.path(), "run.jsonl", 0.01);

    logbook()
        .arg("inspect")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("optimizer"))
        .stdout(predicate::str::contains("adam"))
        .stdout(predicate::str::contains("Last Metric (2 total rows)"))
        .stdout(predicate::str::contains("message"));
}

#[test]
fn test_inspect_missing_path_fails() {
    let tmp = TempDir::new().unwrap();
    logbook()
        .arg("inspect")
        .arg(tmp.path().join("nope.jsonl"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Log not found"));
}

#[test]
fn test_export_csv_to_stdout() {
    let tmp = TempDir::new().unwrap();
    let log = sample_log(tmp.path(), "run.jsonl", 0.01);

    logbook()
        .args(["export", "--format", "csv"])
        .arg(&log)
        .assert()
        .success()
        .stdout("loss,step\n0.9,1\n0.5,2\n");
}

#[test]
fn test_export_json_to_file() {
    let tmp = TempDir::new().unwrap();
    let log = sample_log(tmp.path(), "run.jsonl", 0.01);
    let out = tmp.path().join("metrics.json");

    logbook()
        .args(["export", "--format", "json", "--output"])
        .arg(&out)
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 2 rows"));

    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(exported.as_array().unwrap().len(), 2);
    assert_eq!(exported[1]["loss"], serde_json::json!(0.5));
}

#[test]
fn test_export_parquet_requires_output() {
    let tmp = TempDir::new().unwrap();
    let log = sample_log(tmp.path(), "run.jsonl", 0.01);

    logbook()
        .args(["export", "--format", "parquet"])
        .arg(&log)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--output is required"));

    let out = tmp.path().join("metrics.parquet");
    logbook()
        .args(["export", "--format", "parquet", "--output"])
        .arg(&out)
        .arg(&log)
        .assert()
        .success();
    assert!(out.exists());
}

#[test]
fn test_diff_reports_changed_keys() {
    let tmp = TempDir::new().unwrap();
    let a = sample_log(tmp.path(), "a.jsonl", 0.01);
    let b = sample_log(tmp.path(), "b.jsonl", 0.1);

    logbook()
        .arg("diff")
        .arg(&a)
        .arg(&b)
        .assert()
        .success()
        .stdout(predicate::str::contains("lr"))
        .stdout(predicate::str::contains("0.1"))
        .stdout(predicate::str::contains("optimizer").not());

    logbook()
        .arg("diff")
        .arg(&a)
        .arg(&a)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configs are identical."));
}

#[test]
fn test_replay_through_filesystem_backend() {
    let tmp = TempDir::new().unwrap();
    let log = sample_log(tmp.path(), "run.jsonl", 0.01);
    let replayed = tmp.path().join("out").join("replayed.jsonl");
    let config = tmp.path().join("logbook.yaml");
    std::fs::write(
        &config,
        format!(
            "id: replay\nname: replay\nloggers:\n  filesystem:\n    logger_file_path: {}\n    logger_name: replay\n    echo: false\n",
            replayed.display()
        ),
    )
    .unwrap();

    logbook()
        .arg("replay")
        .arg("--config")
        .arg(&config)
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("Replayed 4 of 4 records"));

    let content = std::fs::read_to_string(&replayed).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0]["logbook_id"], serde_json::json!("replay"));
    assert_eq!(lines[0]["logbook_type"], serde_json::json!("config"));
    assert_eq!(lines[2]["loss"], serde_json::json!(0.5));
}

#[test]
fn test_replay_rejects_config_without_backends() {
    let tmp = TempDir::new().unwrap();
    let log = sample_log(tmp.path(), "run.jsonl", 0.01);
    let config = tmp.path().join("empty.yaml");
    std::fs::write(&config, "id: x\nname: x\n").unwrap();

    logbook()
        .arg("replay")
        .arg("--config")
        .arg(&config)
        .arg(&log)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no backends"));
}
