use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use crate::llm::{self, GenerationConfig, TextGenerator, hub};
use crate::prompt;
use crate::scenario::{BoardTexture, HandFeatures, Scenario};

/// Everything the inference driver needs, assembled from the CLI.
#[derive(Debug, Clone)]
pub struct InferOptions {
    pub model_dir: PathBuf,
    pub generation: GenerationConfig,
    pub cpu: bool,
    pub no_color: bool,
}

enum RoundOutcome {
    Continue,
    Quit,
}

/// Loads the fine-tuned model, runs the fixed test scenarios, then drops
/// into the interactive loop. Scenarios are processed independently; a
/// failed round reports its error and the loop continues.
pub fn run(options: InferOptions) -> Result<()> {
    let device = llm::device(options.cpu)?;
    println!("正在加载模型：{}", options.model_dir.display());
    let assets = hub::resolve(&options.model_dir.to_string_lossy())?;
    let mut generator = TextGenerator::load(&assets, &device, &options.generation)?;

    println!("\n{}", "=".repeat(80));
    println!("开始测试微调后的扑克GTO模型");
    println!("{}\n", "=".repeat(80));

    for (index, (name, scenario)) in test_scenarios().iter().enumerate() {
        print_scenario_header(index + 1, name, scenario, options.no_color);
        let advice = advise(&mut generator, scenario)?;
        println!("\n模型建议:");
        println!("{advice}");
        println!("\n{}", "=".repeat(80));
    }

    println!("\n进入交互式测试模式（输入 'quit' 退出）");
    loop {
        println!("\n请输入牌局信息：");
        match interactive_round(&mut generator) {
            Ok(RoundOutcome::Continue) => {}
            Ok(RoundOutcome::Quit) => break,
            Err(err) => println!("错误: {err}"),
        }
    }
    Ok(())
}

/// Formats the scenario through the shared template, generates, and
/// extracts the answer after the response delimiter.
fn advise(generator: &mut TextGenerator, scenario: &Scenario) -> Result<String> {
    let prompt = prompt::inference_prompt(scenario);
    let decoded = generator.complete(&prompt)?;
    Ok(prompt::extract_response(&decoded).to_string())
}

fn print_scenario_header(index: usize, name: &str, scenario: &Scenario, no_color: bool) {
    if no_color {
        println!("\n场景 {index}: {name}");
    } else {
        println!("\n{} {index}: {}", "场景".bold().cyan(), name.bold());
    }
    println!("{}", "-".repeat(60));
    println!("牌面: {}", scenario.board);
    println!("手牌: {}", scenario.hole_cards);
    println!(
        "位置: {} vs {}",
        scenario.player_position, scenario.opponent_position
    );
    println!("行动历史: {}", scenario.action_history);
    println!("SPR: {}", scenario.spr);
    println!("{}", "-".repeat(60));
}

fn interactive_round(generator: &mut TextGenerator) -> Result<RoundOutcome> {
    let Some(board) = read_field("牌面（如 As Kd 7c）: ")? else {
        return Ok(RoundOutcome::Quit);
    };
    if board.eq_ignore_ascii_case("quit") {
        return Ok(RoundOutcome::Quit);
    }
    let Some(hole_cards) = read_field("手牌（如 Ah Qh）: ")? else {
        return Ok(RoundOutcome::Quit);
    };
    let Some(player_position) = read_field("玩家位置（如 CO）: ")? else {
        return Ok(RoundOutcome::Quit);
    };
    let Some(opponent_position) = read_field("对手位置（如 BB）: ")? else {
        return Ok(RoundOutcome::Quit);
    };
    let Some(oop_answer) = read_field("是否OOP（y/n）: ")? else {
        return Ok(RoundOutcome::Quit);
    };
    let Some(spr_answer) = read_field("SPR: ")? else {
        return Ok(RoundOutcome::Quit);
    };
    let spr: f64 = spr_answer
        .parse()
        .with_context(|| format!("SPR 需要是数字，收到 '{spr_answer}'"))?;
    let Some(action_history) = read_field("行动历史: ")? else {
        return Ok(RoundOutcome::Quit);
    };

    // Fields the loop does not collect fall back to neutral defaults.
    let scenario = Scenario {
        board,
        hole_cards,
        player_position: player_position.to_uppercase(),
        opponent_position: opponent_position.to_uppercase(),
        player_is_oop: oop_answer.eq_ignore_ascii_case("y"),
        spr,
        action_history,
        board_texture_summary: BoardTexture::interactive_default(),
        hand_features: HandFeatures::interactive_default(),
        equity: 0.5,
        pot_odds: 0.0,
        stack_depth: 100.0,
        bet_level: 0,
        bet_pct: 0.0,
    };

    let advice = advise(generator, &scenario)?;
    println!("\n{}", "-".repeat(60));
    println!("模型建议:");
    println!("{advice}");
    println!("{}", "-".repeat(60));
    Ok(RoundOutcome::Continue)
}

/// Prompts for one terminal field; `None` means stdin reached end-of-file
/// and the loop should wind down.
fn read_field(label: &str) -> Result<Option<String>> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    let bytes = io::stdin().read_line(&mut line)?;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// The fixed post-training smoke scenarios.
fn test_scenarios() -> Vec<(&'static str, Scenario)> {
    vec![
        (
            "高张牌面的持续下注",
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
            },
        ),
        (
            "低张牌面的诈唬机会",
            Scenario {
                board: "7s 6d 2c".to_string(),
                hole_cards: "Kc Qd".to_string(),
                player_position: "BTN".to_string(),
                opponent_position: "SB".to_string(),
                player_is_oop: false,
                spr: 2.8,
                action_history: "OOP 过牌".to_string(),
                board_texture_summary: BoardTexture {
                    kind: "低张".to_string(),
                    suitedness: "彩虹".to_string(),
                    connectedness: "两张连续".to_string(),
                },
                hand_features: HandFeatures {
                    hand_category: "medium".to_string(),
                    hand_strength_score: 2,
                    connector_type: "connected".to_string(),
                    made_hand_type: Some("high_card".to_string()),
                },
                equity: 0.35,
                pot_odds: 0.0,
                stack_depth: 280.0,
                bet_level: 0,
                bet_pct: 0.0,
            },
        ),
        (
            "面对下注的决策",
            Scenario {
                board: "Js Th 5h".to_string(),
                hole_cards: "Ac Jc".to_string(),
                player_position: "BB".to_string(),
                opponent_position: "CO".to_string(),
                player_is_oop: true,
                spr: 2.5,
                action_history: "OOP 过牌，IP 下注 33 个筹码".to_string(),
                board_texture_summary: BoardTexture {
                    kind: "高张".to_string(),
                    suitedness: "两张同花".to_string(),
                    connectedness: "两张连续".to_string(),
                },
                hand_features: HandFeatures {
                    hand_category: "strong".to_string(),
                    hand_strength_score: 3,
                    connector_type: "none".to_string(),
                    made_hand_type: Some("pair".to_string()),
                },
                equity: 0.68,
                pot_odds: 0.248,
                stack_depth: 250.0,
                bet_level: 1,
                bet_pct: 0.33,
            },
        ),
    ]
}
