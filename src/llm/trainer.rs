//! Adapter fine-tuning over a frozen base model.
//!
//! The loop is deliberately plain: tokenize the formatted examples, run
//! next-token cross-entropy over the adapter parameters, step AdamW, and
//! persist. Training is invoked exactly once per run; any failure aborts
//! the run with no resume path.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Optimizer, ParamsAdamW, VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressStyle};
use tokenizers::Tokenizer;
use tracing::info;

use crate::dataset::TrainingExample;

use super::hub::{self, ModelAssets};
use super::lora::LoraConfig;
use super::model::{AdapterWiring, AdvisorModel};
use super::{load_config, load_tokenizer};

/// Numeric precision the base weights and adapters train in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    F32,
    F16,
    Bf16,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
            Precision::Bf16 => DType::BF16,
        }
    }
}

/// Which optimizer steps the adapter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizerChoice {
    #[default]
    AdamW,
    Sgd,
}

/// The full set of fine-tuning options. Defaults are the recipe this
/// dataset was tuned with.
#[derive(Debug, Clone)]
pub struct FineTuneConfig {
    /// Base model: a Hugging Face model id or a local directory.
    pub model: String,
    pub max_seq_len: usize,
    pub precision: Precision,
    pub lora: LoraConfig,
    pub batch_size: usize,
    pub grad_accum_steps: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub warmup_steps: usize,
    pub weight_decay: f64,
    pub optimizer: OptimizerChoice,
    /// Adapter checkpoint cadence, in optimizer steps.
    pub save_steps: usize,
    /// Evaluation-loss cadence, in optimizer steps.
    pub eval_steps: usize,
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl Default for FineTuneConfig {
    fn default() -> Self {
        Self {
            model: "Qwen/Qwen2.5-1.5B-Instruct".to_string(),
            max_seq_len: 2048,
            precision: Precision::F32,
            lora: LoraConfig::default(),
            batch_size: 1,
            grad_accum_steps: 8,
            epochs: 3,
            learning_rate: 2e-4,
            warmup_steps: 10,
            weight_decay: 0.001,
            optimizer: OptimizerChoice::AdamW,
            save_steps: 100,
            eval_steps: 100,
            seed: 42,
            output_dir: PathBuf::from("qwen3_poker_gto_final"),
        }
    }
}

/// Enum dispatch over the supported optimizers; `candle_nn::Optimizer` is
/// not object-safe.
enum TuningOptimizer {
    AdamW(candle_nn::AdamW),
    Sgd(candle_nn::SGD),
}

impl TuningOptimizer {
    fn new(choice: OptimizerChoice, vars: Vec<candle_core::Var>, params: ParamsAdamW) -> Result<Self> {
        Ok(match choice {
            OptimizerChoice::AdamW => TuningOptimizer::AdamW(candle_nn::AdamW::new(vars, params)?),
            OptimizerChoice::Sgd => TuningOptimizer::Sgd(candle_nn::SGD::new(vars, params.lr)?),
        })
    }

    fn set_learning_rate(&mut self, lr: f64) {
        match self {
            TuningOptimizer::AdamW(opt) => opt.set_learning_rate(lr),
            TuningOptimizer::Sgd(opt) => opt.set_learning_rate(lr),
        }
    }

    fn backward_step(&mut self, loss: &Tensor) -> candle_core::Result<()> {
        match self {
            TuningOptimizer::AdamW(opt) => opt.backward_step(loss),
            TuningOptimizer::Sgd(opt) => opt.backward_step(loss),
        }
    }
}

pub struct FineTuner {
    config: FineTuneConfig,
    device: Device,
}

impl FineTuner {
    pub fn new(config: FineTuneConfig, device: Device) -> Self {
        Self { config, device }
    }

    /// Trains adapters over the prepared datasets and persists the merged
    /// model (weights, tokenizer, config) into the output directory.
    pub fn run(
        &self,
        train: &[TrainingExample],
        eval: Option<&[TrainingExample]>,
    ) -> Result<()> {
        if train.is_empty() {
            bail!("training set is empty");
        }

        self.device.set_seed(self.config.seed)?;

        let assets = hub::resolve(&self.config.model)?;
        let model_config = load_config(&assets.config)?;
        let tokenizer = load_tokenizer(&assets.tokenizer)?;

        // The frozen base and the adapters share one dtype so every matmul
        // stays dtype-consistent.
        let dtype = self.config.precision.dtype();
        let base_vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&assets.weights, dtype, &self.device)?
        };
        let adapter_vars = VarMap::new();
        let adapter_vb = VarBuilder::from_varmap(&adapter_vars, dtype, &self.device);
        let wiring = AdapterWiring {
            config: &self.config.lora,
            vb: adapter_vb,
            training: true,
        };
        let mut model = AdvisorModel::new(&model_config, base_vb, Some(wiring), false)?;
        info!(
            model = %self.config.model,
            rank = self.config.lora.rank,
            targets = ?self.config.lora.target_modules,
            "adapters attached"
        );

        let train_tokens = self.tokenize_examples(&tokenizer, train)?;
        let eval_tokens = eval
            .map(|examples| self.tokenize_examples(&tokenizer, examples))
            .transpose()?;

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            ..Default::default()
        };
        let mut optimizer =
            TuningOptimizer::new(self.config.optimizer, adapter_vars.all_vars(), params)?;

        let examples_per_step = self.config.batch_size * self.config.grad_accum_steps;
        if examples_per_step == 0 {
            bail!("batch size and gradient accumulation steps must be nonzero");
        }
        let steps_per_epoch = train_tokens.len().div_ceil(examples_per_step);
        let total_steps = steps_per_epoch * self.config.epochs;
        let progress = training_bar(total_steps as u64)?;

        let mut step = 0usize;
        for epoch in 1..=self.config.epochs {
            for chunk in train_tokens.chunks(examples_per_step) {
                step += 1;

                let mut losses = Vec::with_capacity(chunk.len());
                for ids in chunk {
                    losses.push(self.example_loss(&mut model, ids)?);
                }
                let loss = Tensor::stack(&losses, 0)?.mean_all()?;

                optimizer.set_learning_rate(self.warmup_lr(step));
                optimizer.backward_step(&loss)?;

                let loss_value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
                progress.set_message(format!("epoch {epoch} loss {loss_value:.4}"));
                progress.inc(1);

                if self.config.save_steps > 0 && step % self.config.save_steps == 0 {
                    self.save_checkpoint(&adapter_vars, step)?;
                }
                if self.config.eval_steps > 0 && step % self.config.eval_steps == 0 {
                    if let Some(eval_tokens) = &eval_tokens {
                        let eval_loss = self.evaluation_loss(&mut model, eval_tokens)?;
                        info!(step, eval_loss, "evaluation pass");
                    }
                }
            }
        }
        progress.finish_with_message("training complete");

        self.persist_merged(&model, &assets)
    }

    /// Encodes every formatted example, truncated to the sequence cap, with
    /// a trailing end-of-text token so the model learns to stop.
    fn tokenize_examples(
        &self,
        tokenizer: &Tokenizer,
        examples: &[TrainingExample],
    ) -> Result<Vec<Vec<u32>>> {
        let eos = ["<|im_end|>", "<|endoftext|>"]
            .iter()
            .find_map(|tok| tokenizer.token_to_id(tok));
        let mut tokenized = Vec::with_capacity(examples.len());
        for example in examples {
            let encoding = tokenizer
                .encode(example.text.as_str(), true)
                .map_err(anyhow::Error::msg)?;
            let mut ids = encoding.get_ids().to_vec();
            if let Some(eos) = eos {
                ids.push(eos);
            }
            ids.truncate(self.config.max_seq_len);
            if ids.len() < 2 {
                bail!("example tokenized to fewer than two tokens");
            }
            tokenized.push(ids);
        }
        Ok(tokenized)
    }

    /// Next-token cross-entropy for one example.
    fn example_loss(&self, model: &mut AdvisorModel, ids: &[u32]) -> Result<Tensor> {
        let inputs = Tensor::new(&ids[..ids.len() - 1], &self.device)?.unsqueeze(0)?;
        let targets = Tensor::new(&ids[1..], &self.device)?;
        let logits = model.forward(&inputs, 0)?.squeeze(0)?;
        Ok(candle_nn::loss::cross_entropy(&logits, &targets)?)
    }

    fn evaluation_loss(&self, model: &mut AdvisorModel, eval_tokens: &[Vec<u32>]) -> Result<f64> {
        let mut total = 0f64;
        for ids in eval_tokens {
            let loss = self.example_loss(model, ids)?.to_dtype(DType::F32)?;
            total += loss.to_scalar::<f32>()? as f64;
        }
        Ok(total / eval_tokens.len().max(1) as f64)
    }

    fn warmup_lr(&self, step: usize) -> f64 {
        if self.config.warmup_steps > 0 && step <= self.config.warmup_steps {
            self.config.learning_rate * step as f64 / self.config.warmup_steps as f64
        } else {
            self.config.learning_rate
        }
    }

    fn save_checkpoint(&self, adapter_vars: &VarMap, step: usize) -> Result<()> {
        let dir = self
            .config
            .output_dir
            .join("checkpoints")
            .join(format!("step-{step}"));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating checkpoint directory {}", dir.display()))?;
        let path = dir.join("adapter.safetensors");
        adapter_vars.save(&path)?;
        info!(step, path = %path.display(), "adapter checkpoint saved");
        Ok(())
    }

    /// Folds the adapter deltas into the base weights and writes the
    /// self-contained adapted-model directory.
    fn persist_merged(&self, model: &AdvisorModel, assets: &ModelAssets) -> Result<()> {
        let out = &self.config.output_dir;
        std::fs::create_dir_all(out)
            .with_context(|| format!("creating output directory {}", out.display()))?;

        let mut tensors: HashMap<String, Tensor> = HashMap::new();
        for file in &assets.weights {
            let loaded = candle_core::safetensors::load(file, &Device::Cpu)?;
            tensors.extend(loaded);
        }
        for (name, delta) in model.adapter_deltas()? {
            let Some(base) = tensors.get(&name) else {
                bail!("adapted tensor {name} not present in base weights");
            };
            let delta = delta.to_device(&Device::Cpu)?.to_dtype(base.dtype())?;
            let merged = (base + &delta)?;
            tensors.insert(name, merged);
        }

        let weights_path = out.join("model.safetensors");
        candle_core::safetensors::save(&tensors, &weights_path)
            .with_context(|| format!("writing {}", weights_path.display()))?;
        std::fs::copy(&assets.config, out.join("config.json"))?;
        std::fs::copy(&assets.tokenizer, out.join("tokenizer.json"))?;
        info!(dir = %out.display(), "adapted model saved");
        Ok(())
    }
}

fn training_bar(total_steps: u64) -> Result<ProgressBar> {
    let bar = ProgressBar::new(total_steps);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );
    Ok(bar)
}
