//! Narrow seam over the candle stack: model assets, the adapter-capable
//! decoder, fine-tuning, generation and quantized export. Everything
//! outside this module works with prompts, records and paths only.

pub mod export;
pub mod generate;
pub mod hub;
pub mod lora;
pub mod model;
pub mod trainer;

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use candle_core::Device;
use tokenizers::Tokenizer;

pub use generate::{GenerationConfig, TextGenerator};
pub use lora::{LoraConfig, TARGET_MODULES};
pub use model::ModelConfig;
pub use trainer::{FineTuneConfig, FineTuner};

/// Picks the compute device: CUDA when available unless the caller forces
/// CPU.
pub fn device(force_cpu: bool) -> Result<Device> {
    if force_cpu {
        Ok(Device::Cpu)
    } else {
        Ok(Device::cuda_if_available(0)?)
    }
}

pub fn load_config(path: &Path) -> Result<ModelConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading model config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing model config {}", path.display()))
}

pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path)
        .map_err(|err| anyhow!("loading tokenizer {}: {err}", path.display()))
}
