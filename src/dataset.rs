use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::prompt;
use crate::scenario::LabeledScenario;

/// One formatted instruction/response block ready for tokenization.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("line {line}: malformed record: {source}")]
    MalformedLine {
        line: usize,
        source: serde_json::Error,
    },
}

/// Parses a newline-delimited record file. Any malformed line fails the
/// whole load; no partial dataset is produced.
pub fn load_labeled_scenarios(path: &Path) -> Result<Vec<LabeledScenario>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading training data from {}", path.display()))?;
    parse_jsonl(&contents).with_context(|| format!("parsing {}", path.display()))
}

fn parse_jsonl(contents: &str) -> Result<Vec<LabeledScenario>, DatasetError> {
    contents
        .lines()
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line.trim())
                .map_err(|source| DatasetError::MalformedLine {
                    line: idx + 1,
                    source,
                })
        })
        .collect()
}

/// Formats every record through the shared prompt templates, preserving
/// file order.
pub fn format_examples(records: &[LabeledScenario]) -> Vec<TrainingExample> {
    records
        .iter()
        .map(|record| TrainingExample {
            text: prompt::training_example(record),
        })
        .collect()
}

/// Loads and formats the training set, and the evaluation set when its file
/// exists. A missing evaluation file is skipped; a missing training file is
/// an error.
pub fn prepare_datasets(
    train_path: &Path,
    eval_path: Option<&Path>,
) -> Result<(Vec<TrainingExample>, Option<Vec<TrainingExample>>)> {
    let train_records = load_labeled_scenarios(train_path)?;
    let train = format_examples(&train_records);
    info!(examples = train.len(), path = %train_path.display(), "training set loaded");

    let eval = match eval_path {
        Some(path) if path.exists() => {
            let records = load_labeled_scenarios(path)?;
            let formatted = format_examples(&records);
            info!(examples = formatted.len(), path = %path.display(), "evaluation set loaded");
            Some(formatted)
        }
        Some(path) => {
            info!(path = %path.display(), "evaluation file not found, skipping");
            None
        }
        None => None,
    };

    Ok((train, eval))
}
