//! Shared prompt templating for training and inference.
//!
//! The fine-tuned model only produces meaningful completions when the
//! inference-time prompt framing is byte-identical to the framing the
//! training data was built with. Both drivers therefore go through the
//! functions in this module; neither keeps its own copy of the template.

use crate::scenario::{LabeledScenario, Scenario};

pub const INSTRUCTION_MARKER: &str = "### Instruction:";
pub const RESPONSE_MARKER: &str = "### Response:";

/// Renders the instruction block describing one decision point. Every
/// scenario field appears, in fixed order and framing.
pub fn scenario_block(s: &Scenario) -> String {
    format!(
        "你是一名德州扑克GTO策略助手。请根据以下牌局信息提供最优的行动建议。

牌面：{board}
手牌：{hole_cards}
位置：{player_pos} vs {opp_pos}
玩家位置：{oop}
SPR：{spr:.2}
行动历史：{history}

牌面结构：
- 类型：{texture_kind}
- 花色：{suitedness}  
- 连接性：{connectedness}

手牌特征：
- 类型：{hand_category}
- 强度评分：{strength}/4
- 连接类型：{connector}
- 成牌/听牌：{made_hand}
- 胜率：{equity}

游戏信息：
- 有效筹码：{stack:.0}bb
- 下注轮次：{bet_level}
- 最近下注占底池：{bet_pct}
- 底池赔率：{pot_odds}

请分析最佳GTO行动。",
        board = s.board,
        hole_cards = s.hole_cards,
        player_pos = s.player_position,
        opp_pos = s.opponent_position,
        oop = position_flag(s.player_is_oop),
        spr = s.spr,
        history = s.action_history,
        texture_kind = s.board_texture_summary.kind,
        suitedness = s.board_texture_summary.suitedness,
        connectedness = s.board_texture_summary.connectedness,
        hand_category = s.hand_features.hand_category,
        strength = s.hand_features.hand_strength_score,
        connector = s.hand_features.connector_type,
        made_hand = made_hand_label(s),
        equity = percentage(s.equity),
        stack = s.stack_depth,
        bet_level = s.bet_level,
        bet_pct = percentage(s.bet_pct),
        pot_odds = percentage(s.pot_odds),
    )
}

/// Renders the supervised response block echoing the GTO label.
pub fn response_block(l: &LabeledScenario) -> String {
    let s = &l.scenario;
    let action = l.gto_action.to_uppercase();
    format!(
        "基于当前牌局，GTO最优行动是：**{action}** (频率：{freq:.1}%)

行动分析：
1. **行动选择**：{action}
2. **执行频率**：{freq:.1}%
3. **期望值(EV)**：{ev:.3}bb

策略解释：
- 手牌类型：{hand_category}（{hole_cards}）
- 在当前牌面（{board}）上，手牌胜率为{equity}
- 考虑到SPR={spr:.2}和位置（{oop}），该行动是最优选择
- 频率{freq:.1}%确保了策略的平衡性",
        action = action,
        freq = l.frequency_pct,
        ev = l.ev,
        hand_category = s.hand_features.hand_category,
        hole_cards = s.hole_cards,
        board = s.board,
        equity = percentage(s.equity),
        spr = s.spr,
        oop = position_flag(s.player_is_oop),
    )
}

/// One complete training example: instruction and response joined by the
/// delimiter convention. For any scenario, this begins with the exact text
/// `inference_prompt` produces for the same fields.
pub fn training_example(l: &LabeledScenario) -> String {
    format!(
        "{INSTRUCTION_MARKER}\n{}\n\n{RESPONSE_MARKER}\n{}",
        scenario_block(&l.scenario),
        response_block(l),
    )
}

/// The generation prompt: instruction plus an open response delimiter for
/// the model to continue from.
pub fn inference_prompt(s: &Scenario) -> String {
    format!(
        "{INSTRUCTION_MARKER}\n{}\n\n{RESPONSE_MARKER}",
        scenario_block(s)
    )
}

/// Extracts the model's answer from decoded generation output: the
/// substring after the first `### Response:` marker, trimmed. The decoded
/// text normally contains the prompt itself, so the first marker is the one
/// the prompt ended with. When the marker is absent (the model was cut off
/// before echoing it, or decoding skipped it), the whole decoded text is
/// returned trimmed.
pub fn extract_response(decoded: &str) -> &str {
    match decoded.find(RESPONSE_MARKER) {
        Some(idx) => decoded[idx + RESPONSE_MARKER.len()..].trim(),
        None => decoded.trim(),
    }
}

fn position_flag(player_is_oop: bool) -> &'static str {
    if player_is_oop { "OOP" } else { "IP" }
}

/// Probability in [0,1] rendered as a percentage with two decimal places,
/// e.g. `0.82` -> `82.00%`.
fn percentage(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

fn made_hand_label(s: &Scenario) -> &str {
    s.hand_features.made_hand_type.as_deref().unwrap_or("高牌")
}
