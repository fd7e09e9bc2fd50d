//! Integration tests for the read-only commands: `models`, `decode`, `history`, `compare`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn kiln(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("NO_COLOR", "1")
        .env("KILN_DATA_DIR", home.path().join("data"));
    cmd
}

fn seed_history(home: &TempDir) {
    let data = home.path().join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(
        data.join("history.json"),
        r#"[
  {"id": "exp_a", "date": "2026-01-19T14:25:01Z", "final_accuracy": 0.61, "model": "resnet18",
   "metrics": [{"epoch": 1, "train_accuracy": 0.5, "train_loss": 1.0, "val_accuracy": 0.55, "val_loss": 1.1},
               {"epoch": 2, "train_accuracy": 0.6, "train_loss": 0.9, "val_accuracy": 0.61, "val_loss": 1.0}],
   "duration_secs": 42.0},
  {"id": "exp_b", "date": "2026-01-19T15:00:00Z", "final_accuracy": 0.7, "model": "vit_b_16",
   "metrics": [{"epoch": 1, "train_accuracy": 0.6, "train_loss": 0.8, "val_accuracy": 0.7, "val_loss": 0.9}],
   "duration_secs": 12.5}
]"#,
    )
    .unwrap();
}

#[test]
fn test_models_lists_catalog() {
    let home = TempDir::new().unwrap();
    kiln(&home)
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("resnet18"))
        .stdout(predicate::str::contains("ViT-B/16 (Vision Transformer)"))
        .stdout(predicate::str::contains("(default)"));
}

#[test]
fn test_decode_reads_stdin_one_event_per_line() {
    let home = TempDir::new().unwrap();
    let input = "Epoch 1 starting\n\n{\"status\":\"training\",\"epoch\":\"3\",\"total_epochs\":10,\"val_accuracy\":\"0.5\"}\n{\"status\":\"resumed\",\"message\":\"Resumed from epoch 4\",\"best_acc\":0.8}";

    let output = kiln(&home).arg("decode").write_stdin(input).output().unwrap();
    assert!(output.status.success());

    let events: Vec<serde_json::Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0]["kind"], "unstructured");
    assert_eq!(events[1]["kind"], "unstructured");
    assert_eq!(events[1]["raw_line"], "");
    assert_eq!(events[2]["kind"], "progress");
    assert_eq!(events[2]["epoch"], 3);
    assert_eq!(events[3]["kind"], "resumed");
    assert_eq!(events[3]["epoch"], 4);
}

#[test]
fn test_decode_missing_file_fails() {
    let home = TempDir::new().unwrap();
    kiln(&home)
        .args(["decode", "no-such-log.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open"));
}

#[test]
fn test_history_empty() {
    let home = TempDir::new().unwrap();
    kiln(&home)
        .args(["history", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn test_history_lists_newest_first() {
    let home = TempDir::new().unwrap();
    seed_history(&home);

    let output = kiln(&home).arg("history").output().unwrap();
    let stdout = String::from_utf8(output.stdout).unwrap();
    let a = stdout.find("exp_a").unwrap();
    let b = stdout.find("exp_b").unwrap();
    assert!(b < a);
    assert!(stdout.contains("Recent Experiments (2)"));
}

#[test]
fn test_compare_pads_shorter_run() {
    let home = TempDir::new().unwrap();
    seed_history(&home);

    let output = kiln(&home).args(["compare", "exp_a", "exp_b", "--json"]).output().unwrap();
    assert!(output.status.success());

    let merged: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let points = merged.as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert!(points[1]["left"].is_object());
    assert!(points[1]["right"].is_null());
}

#[test]
fn test_compare_unknown_experiment_fails() {
    let home = TempDir::new().unwrap();
    seed_history(&home);

    kiln(&home)
        .args(["compare", "exp_a", "exp_zzz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown experiment: exp_zzz"));
}

#[test]
fn test_bad_config_file_is_reported() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("bad.toml");
    fs::write(&config, "history_capacity = \"many\"\n").unwrap();

    kiln(&home)
        .arg("--config")
        .arg(&config)
        .arg("models")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load settings"));
}
