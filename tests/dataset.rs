use std::fs;
use std::path::Path;

use gto_advisor::dataset;
use gto_advisor::prompt::INSTRUCTION_MARKER;

fn record_line(board: &str, action: &str) -> String {
    serde_json::json!({
        "board": board,
        "hole_cards": "Ah Qh",
        "player_position": "CO",
        "opponent_position": "BB",
        "player_is_oop": false,
        "spr": 3.5,
        "action_history": "OOP 过牌",
        "board_texture_summary": {
            "type": "高张",
            "suitedness": "彩虹",
            "connectedness": "无顺子听牌"
        },
        "hand_features": {
            "hand_category": "strong",
            "hand_strength_score": 3,
            "connector_type": "none",
            "made_hand_type": "pair"
        },
        "equity": 0.82,
        "pot_odds": 0.0,
        "stack_depth": 350,
        "bet_level": 0,
        "bet_pct": 0.0,
        "gto_action": action,
        "frequency_pct": 67.5,
        "ev": 1.234
    })
    .to_string()
}

fn write_lines(path: &Path, lines: &[String]) {
    fs::write(path, lines.join("\n")).expect("fixture written");
}

#[test]
fn loads_and_formats_records_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let train = dir.path().join("train.jsonl");
    write_lines(
        &train,
        &[record_line("As Kd 7c", "bet"), record_line("7s 6d 2c", "check")],
    );

    let (examples, eval) = dataset::prepare_datasets(&train, None).expect("load succeeds");
    assert_eq!(examples.len(), 2);
    assert!(eval.is_none());
    assert!(examples[0].text.starts_with(INSTRUCTION_MARKER));
    assert!(examples[0].text.contains("牌面：As Kd 7c"));
    assert!(examples[0].text.contains("**BET**"));
    assert!(examples[1].text.contains("牌面：7s 6d 2c"));
    assert!(examples[1].text.contains("**CHECK**"));
}

#[test]
fn malformed_line_fails_the_whole_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let train = dir.path().join("train.jsonl");
    write_lines(
        &train,
        &[
            record_line("As Kd 7c", "bet"),
            "{not json".to_string(),
            record_line("7s 6d 2c", "check"),
        ],
    );

    let err = dataset::prepare_datasets(&train, None).expect_err("load must fail");
    let message = format!("{err:#}");
    assert!(message.contains("line 2"), "{message}");
}

#[test]
fn missing_label_fields_fail_the_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let train = dir.path().join("train.jsonl");
    let mut record: serde_json::Value =
        serde_json::from_str(&record_line("As Kd 7c", "bet")).expect("valid fixture");
    record.as_object_mut().expect("object").remove("gto_action");
    write_lines(&train, &[record.to_string()]);

    assert!(dataset::prepare_datasets(&train, None).is_err());
}

#[test]
fn missing_eval_file_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let train = dir.path().join("train.jsonl");
    write_lines(&train, &[record_line("As Kd 7c", "bet")]);
    let eval = dir.path().join("eval.jsonl");

    let (examples, eval_examples) =
        dataset::prepare_datasets(&train, Some(&eval)).expect("load succeeds");
    assert_eq!(examples.len(), 1);
    assert!(eval_examples.is_none());
}

#[test]
fn present_eval_file_is_loaded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let train = dir.path().join("train.jsonl");
    let eval = dir.path().join("eval.jsonl");
    write_lines(&train, &[record_line("As Kd 7c", "bet")]);
    write_lines(
        &eval,
        &[record_line("Js Th 5h", "call"), record_line("7s 6d 2c", "fold")],
    );

    let (_, eval_examples) =
        dataset::prepare_datasets(&train, Some(&eval)).expect("load succeeds");
    assert_eq!(eval_examples.expect("eval present").len(), 2);
}

#[test]
fn missing_training_file_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let absent = dir.path().join("no-such.jsonl");
    assert!(dataset::prepare_datasets(&absent, None).is_err());
}
