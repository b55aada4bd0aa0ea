use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use gto_advisor::infer::{self, InferOptions};
use gto_advisor::llm::trainer::{OptimizerChoice, Precision};
use gto_advisor::llm::{FineTuneConfig, GenerationConfig, LoraConfig};
use gto_advisor::train::{self, TrainOptions};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "gto-advisor",
    version,
    about = "Poker GTO advice via a LoRA fine-tuned language model",
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable ANSI colors in CLI output
    #[arg(long = "no-color", default_value_t = false, global = true)]
    no_color: bool,

    /// Force CPU even when CUDA is available
    #[arg(long, default_value_t = false, global = true)]
    cpu: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fine-tune the base model on formatted scenario records
    Train {
        /// Newline-delimited training records
        #[arg(long = "train-file", default_value = "train.jsonl")]
        train_file: PathBuf,

        /// Newline-delimited evaluation records (skipped when absent)
        #[arg(long = "eval-file", default_value = "eval.jsonl")]
        eval_file: PathBuf,

        /// Base model: Hugging Face id or local directory
        #[arg(long, default_value = "Qwen/Qwen2.5-1.5B-Instruct")]
        model: String,

        /// Directory for the merged adapted model
        #[arg(long = "output-dir", default_value = "qwen3_poker_gto_final")]
        output_dir: PathBuf,

        /// Directory for the quantized export
        #[arg(long = "gguf-dir", default_value = "qwen3_poker_gto_gguf")]
        gguf_dir: PathBuf,

        /// Sequence length cap for tokenized examples
        #[arg(long = "max-seq-len", default_value_t = 2048)]
        max_seq_len: usize,

        /// Numeric precision for base weights and adapters
        #[arg(long, default_value = "f32")]
        precision: PrecisionArg,

        /// Optimizer stepping the adapters
        #[arg(long, default_value = "adamw")]
        optimizer: OptimizerArg,

        /// LoRA rank
        #[arg(long = "lora-rank", default_value_t = 16)]
        lora_rank: usize,

        /// LoRA alpha
        #[arg(long = "lora-alpha", default_value_t = 16.0)]
        lora_alpha: f64,

        /// LoRA dropout probability
        #[arg(long = "lora-dropout", default_value_t = 0.05)]
        lora_dropout: f32,

        /// Examples per micro-batch
        #[arg(long = "batch-size", default_value_t = 1)]
        batch_size: usize,

        /// Micro-batches accumulated per optimizer step
        #[arg(long = "grad-accum-steps", default_value_t = 8)]
        grad_accum_steps: usize,

        /// Passes over the training set
        #[arg(long, default_value_t = 3)]
        epochs: usize,

        /// AdamW learning rate
        #[arg(long = "learning-rate", default_value_t = 2e-4)]
        learning_rate: f64,

        /// Linear warmup steps
        #[arg(long = "warmup-steps", default_value_t = 10)]
        warmup_steps: usize,

        /// Adapter checkpoint cadence in optimizer steps
        #[arg(long = "save-steps", default_value_t = 100)]
        save_steps: usize,

        /// Evaluation cadence in optimizer steps
        #[arg(long = "eval-steps", default_value_t = 100)]
        eval_steps: usize,

        /// Adapter initialisation seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Generate advice from a fine-tuned model
    Infer {
        /// Directory holding the adapted model
        #[arg(long = "model-dir", default_value = "qwen3_poker_gto_final")]
        model_dir: PathBuf,

        /// Maximum tokens generated per scenario
        #[arg(long = "max-new-tokens", default_value_t = 512)]
        max_new_tokens: usize,

        /// Sampling temperature
        #[arg(long, default_value_t = 0.7)]
        temperature: f64,

        /// Nucleus sampling threshold
        #[arg(long = "top-p", default_value_t = 0.9)]
        top_p: f64,

        /// Sampling seed (random if omitted)
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum PrecisionArg {
    F32,
    F16,
    Bf16,
}

impl From<PrecisionArg> for Precision {
    fn from(arg: PrecisionArg) -> Self {
        match arg {
            PrecisionArg::F32 => Precision::F32,
            PrecisionArg::F16 => Precision::F16,
            PrecisionArg::Bf16 => Precision::Bf16,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OptimizerArg {
    Adamw,
    Sgd,
}

impl From<OptimizerArg> for OptimizerChoice {
    fn from(arg: OptimizerArg) -> Self {
        match arg {
            OptimizerArg::Adamw => OptimizerChoice::AdamW,
            OptimizerArg::Sgd => OptimizerChoice::Sgd,
        }
    }
}

fn main() -> Result<()> {
    // The tokenizers crate spawns rayon workers for batch encoding, which
    // misbehave on some platforms; single-threaded tokenization is plenty
    // for this workload.
    unsafe { std::env::set_var("TOKENIZERS_PARALLELISM", "false") };

    let _ = color_eyre::install();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train {
            train_file,
            eval_file,
            model,
            output_dir,
            gguf_dir,
            max_seq_len,
            precision,
            optimizer,
            lora_rank,
            lora_alpha,
            lora_dropout,
            batch_size,
            grad_accum_steps,
            epochs,
            learning_rate,
            warmup_steps,
            save_steps,
            eval_steps,
            seed,
        } => {
            let lora = LoraConfig {
                rank: lora_rank,
                alpha: lora_alpha,
                dropout: Some(lora_dropout),
                ..LoraConfig::default()
            };
            let config = FineTuneConfig {
                model,
                max_seq_len,
                precision: precision.into(),
                optimizer: optimizer.into(),
                lora,
                batch_size,
                grad_accum_steps,
                epochs,
                learning_rate,
                warmup_steps,
                save_steps,
                eval_steps,
                seed,
                output_dir,
                ..FineTuneConfig::default()
            };
            train::run(TrainOptions {
                train_file,
                eval_file,
                config,
                gguf_dir,
                cpu: cli.cpu,
                no_color: cli.no_color,
            })
        }
        Commands::Infer {
            model_dir,
            max_new_tokens,
            temperature,
            top_p,
            seed,
        } => {
            let generation = GenerationConfig {
                max_new_tokens,
                temperature,
                top_p,
                seed: seed.unwrap_or_else(rand::random),
            };
            infer::run(InferOptions {
                model_dir,
                generation,
                cpu: cli.cpu,
                no_color: cli.no_color,
            })
        }
    }
}
