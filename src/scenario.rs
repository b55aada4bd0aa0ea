use serde::{Deserialize, Serialize};

/// Categorical description of the community-card texture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardTexture {
    #[serde(rename = "type")]
    pub kind: String,
    pub suitedness: String,
    pub connectedness: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandFeatures {
    pub hand_category: String,
    pub hand_strength_score: u8,
    pub connector_type: String,
    pub made_hand_type: Option<String>,
}

/// One poker decision point. Records are read-only inputs: they are parsed
/// from JSONL (training) or assembled from terminal input (inference) and
/// only ever projected into prompt text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub board: String,
    pub hole_cards: String,
    pub player_position: String,
    pub opponent_position: String,
    pub player_is_oop: bool,
    pub spr: f64,
    pub action_history: String,
    pub board_texture_summary: BoardTexture,
    pub hand_features: HandFeatures,
    pub equity: f64,
    pub pot_odds: f64,
    pub stack_depth: f64,
    pub bet_level: u32,
    pub bet_pct: f64,
}

/// A scenario together with its supervised GTO label, as found in the
/// training files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabeledScenario {
    #[serde(flatten)]
    pub scenario: Scenario,
    pub gto_action: String,
    pub frequency_pct: f64,
    pub ev: f64,
}

impl BoardTexture {
    /// Default texture assumed when the interactive loop does not collect one.
    pub fn interactive_default() -> Self {
        Self {
            kind: "高张".to_string(),
            suitedness: "彩虹".to_string(),
            connectedness: "无顺子听牌".to_string(),
        }
    }
}

impl HandFeatures {
    /// Default hand features assumed when the interactive loop does not
    /// collect them.
    pub fn interactive_default() -> Self {
        Self {
            hand_category: "medium".to_string(),
            hand_strength_score: 2,
            connector_type: "none".to_string(),
            made_hand_type: Some("high_card".to_string()),
        }
    }
}
