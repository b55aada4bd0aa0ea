use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use tokenizers::Tokenizer;

use super::hub::ModelAssets;
use super::model::AdvisorModel;
use super::{load_config, load_tokenizer};

/// Sampling parameters for advice generation.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            seed: 42,
        }
    }
}

/// A loaded model plus tokenizer, able to complete prompts. Each completion
/// is independent: the KV cache is reset at the start of every call.
pub struct TextGenerator {
    model: AdvisorModel,
    tokenizer: Tokenizer,
    logits_processor: LogitsProcessor,
    eos_ids: Vec<u32>,
    max_new_tokens: usize,
    device: Device,
}

impl TextGenerator {
    /// Loads a persisted model directory (or hub model) for generation.
    pub fn load(assets: &ModelAssets, device: &Device, config: &GenerationConfig) -> Result<Self> {
        let model_config = load_config(&assets.config)?;
        let dtype = if device.is_cuda() {
            DType::F16
        } else {
            DType::F32
        };
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&assets.weights, dtype, device)? };
        let model = AdvisorModel::new(&model_config, vb, None, true)?;
        let tokenizer = load_tokenizer(&assets.tokenizer)?;

        let mut eos_ids = model_config.eos_token_ids();
        for token in ["<|im_end|>", "<|endoftext|>"] {
            if let Some(id) = tokenizer.token_to_id(token) {
                if !eos_ids.contains(&id) {
                    eos_ids.push(id);
                }
            }
        }

        let logits_processor = LogitsProcessor::new(
            config.seed,
            Some(config.temperature),
            Some(config.top_p),
        );
        Ok(Self {
            model,
            tokenizer,
            logits_processor,
            eos_ids,
            max_new_tokens: config.max_new_tokens,
            device: device.clone(),
        })
    }

    /// Samples a completion and returns the full decoded text, prompt
    /// included, so callers can locate the response delimiter themselves.
    pub fn complete(&mut self, prompt: &str) -> Result<String> {
        self.model.clear_kv_cache();

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(anyhow::Error::msg)?;
        let mut tokens: Vec<u32> = encoding.get_ids().to_vec();
        let prompt_len = tokens.len();

        let input = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
        let logits = self.model.forward_last(&input, 0)?;
        let mut next = self.sample(&logits)?;
        tokens.push(next);

        for generated in 1..self.max_new_tokens {
            if self.eos_ids.contains(&next) {
                break;
            }
            let input = Tensor::new(&[next], &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward_last(&input, prompt_len + generated - 1)?;
            next = self.sample(&logits)?;
            tokens.push(next);
        }

        self.tokenizer
            .decode(&tokens, true)
            .map_err(anyhow::Error::msg)
    }

    fn sample(&mut self, logits: &Tensor) -> Result<u32> {
        let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
        Ok(self.logits_processor.sample(&logits)?)
    }
}
