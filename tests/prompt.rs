use gto_advisor::prompt;
use gto_advisor::scenario::{BoardTexture, HandFeatures, LabeledScenario, Scenario};

fn fixture_scenario() -> Scenario {
    Scenario {
        board: "As Kd 7c".to_string(),
        hole_cards: "Ah Qh".to_string(),
        player_position: "CO".to_string(),
        opponent_position: "BB".to_string(),
        player_is_oop: false,
        spr: 3.5,
        action_history: "OOP 过牌".to_string(),
        board_texture_summary: BoardTexture {
            kind: "高张".to_string(),
            suitedness: "彩虹".to_string(),
            connectedness: "无顺子听牌".to_string(),
        },
        hand_features: HandFeatures {
            hand_category: "strong".to_string(),
            hand_strength_score: 3,
            connector_type: "none".to_string(),
            made_hand_type: Some("pair".to_string()),
        },
        equity: 0.82,
        pot_odds: 0.0,
        stack_depth: 350.0,
        bet_level: 0,
        bet_pct: 0.0,
    }
}

fn fixture_label() -> LabeledScenario {
    LabeledScenario {
        scenario: fixture_scenario(),
        gto_action: "bet".to_string(),
        frequency_pct: 67.5,
        ev: 1.234,
    }
}

#[test]
fn formatter_is_deterministic() {
    let scenario = fixture_scenario();
    assert_eq!(
        prompt::scenario_block(&scenario),
        prompt::scenario_block(&scenario)
    );
    let label = fixture_label();
    assert_eq!(
        prompt::training_example(&label),
        prompt::training_example(&label)
    );
}

#[test]
fn training_prompt_starts_with_inference_prompt() {
    // The fine-tuned model only works if both drivers frame scenarios
    // identically; the training text must extend the generation prompt.
    let label = fixture_label();
    let training = prompt::training_example(&label);
    let inference = prompt::inference_prompt(&label.scenario);
    assert!(training.starts_with(&inference));
    assert!(training.len() > inference.len());
}

#[test]
fn fixture_scenario_renders_expected_substrings() {
    let block = prompt::scenario_block(&fixture_scenario());
    assert!(block.contains("胜率：82.00%"), "{block}");
    assert!(block.contains("有效筹码：350bb"), "{block}");
    assert!(block.contains("下注轮次：0"), "{block}");
}

#[test]
fn probabilities_render_with_two_decimals() {
    let mut scenario = fixture_scenario();
    scenario.pot_odds = 0.248;
    scenario.bet_pct = 0.33;
    let block = prompt::scenario_block(&scenario);
    assert!(block.contains("底池赔率：24.80%"), "{block}");
    assert!(block.contains("最近下注占底池：33.00%"), "{block}");
    assert!(block.contains("SPR：3.50"), "{block}");
}

#[test]
fn frequency_renders_with_one_decimal_and_stack_as_integer() {
    let label = fixture_label();
    let response = prompt::response_block(&label);
    assert!(response.contains("频率：67.5%"), "{response}");
    assert!(response.contains("**期望值(EV)**：1.234bb"), "{response}");

    let block = prompt::scenario_block(&label.scenario);
    assert!(block.contains("有效筹码：350bb"), "{block}");
    assert!(!block.contains("350.0bb"), "{block}");
}

#[test]
fn action_is_uppercased_in_response() {
    let response = prompt::response_block(&fixture_label());
    assert!(response.contains("**BET**"), "{response}");
}

#[test]
fn missing_made_hand_type_falls_back() {
    let mut scenario = fixture_scenario();
    scenario.hand_features.made_hand_type = None;
    let block = prompt::scenario_block(&scenario);
    assert!(block.contains("成牌/听牌：高牌"), "{block}");
}

#[test]
fn suitedness_line_framing_is_preserved() {
    let block = prompt::scenario_block(&fixture_scenario());
    assert!(block.contains("- 花色：彩虹  \n"), "{block:?}");
}

#[test]
fn every_field_appears_in_the_block() {
    let block = prompt::scenario_block(&fixture_scenario());
    for needle in [
        "牌面：As Kd 7c",
        "手牌：Ah Qh",
        "位置：CO vs BB",
        "玩家位置：IP",
        "行动历史：OOP 过牌",
        "- 类型：高张",
        "- 连接性：无顺子听牌",
        "- 类型：strong",
        "- 强度评分：3/4",
        "- 连接类型：none",
        "- 成牌/听牌：pair",
    ] {
        assert!(block.contains(needle), "missing {needle} in {block}");
    }
}

#[test]
fn oop_flag_switches_position_label() {
    let mut scenario = fixture_scenario();
    scenario.player_is_oop = true;
    let block = prompt::scenario_block(&scenario);
    assert!(block.contains("玩家位置：OOP"), "{block}");
}

#[test]
fn extraction_returns_trimmed_text_after_marker() {
    let decoded = "### Instruction:\n某个提示\n\n### Response:\n  建议全下，频率 100%  \n";
    assert_eq!(prompt::extract_response(decoded), "建议全下，频率 100%");
}

#[test]
fn extraction_uses_first_marker() {
    let decoded = "### Response:\nfirst\n### Response:\nsecond";
    assert_eq!(
        prompt::extract_response(decoded),
        "first\n### Response:\nsecond"
    );
}

#[test]
fn extraction_without_marker_returns_whole_text_trimmed() {
    // Generation can be cut off before the delimiter is echoed; the
    // documented fallback is the full decoded text, trimmed.
    let decoded = "  模型输出了一些没有定界符的文本  ";
    assert_eq!(
        prompt::extract_response(decoded),
        "模型输出了一些没有定界符的文本"
    );
}
