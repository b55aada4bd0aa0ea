use assert_cmd::prelude::*;
use std::process::Command;

#[test]
fn help_lists_both_drivers() {
    let mut cmd = Command::cargo_bin("gto-advisor").expect("binary exists");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("train"))
        .stdout(predicates::str::contains("infer"));
}

#[test]
fn infer_fails_cleanly_on_an_empty_model_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cmd = Command::cargo_bin("gto-advisor").expect("binary exists");
    cmd.arg("infer")
        .arg("--model-dir")
        .arg(dir.path())
        .arg("--cpu")
        .arg("--no-color");
    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("missing model asset"));
}

#[test]
fn train_fails_cleanly_on_a_missing_training_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("no-such.jsonl");
    let mut cmd = Command::cargo_bin("gto-advisor").expect("binary exists");
    cmd.arg("train")
        .arg("--train-file")
        .arg(&missing)
        .arg("--cpu")
        .arg("--no-color");
    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("reading training data"));
}
