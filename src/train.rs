use std::path::PathBuf;

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::dataset;
use crate::llm::{self, FineTuneConfig, FineTuner, export};

/// Everything the training driver needs, assembled from the CLI.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub train_file: PathBuf,
    pub eval_file: PathBuf,
    pub config: FineTuneConfig,
    pub gguf_dir: PathBuf,
    pub cpu: bool,
    pub no_color: bool,
}

/// Prepares the datasets, runs the fine-tune exactly once, and writes both
/// artifacts: the merged full-precision model and the quantized export.
pub fn run(options: TrainOptions) -> Result<()> {
    let device = llm::device(options.cpu)?;
    if device.is_cuda() {
        println!("使用GPU进行训练");
    } else if options.no_color {
        println!("警告：未检测到GPU，将使用CPU训练（速度会很慢）");
    } else {
        println!(
            "{}",
            "警告：未检测到GPU，将使用CPU训练（速度会很慢）".yellow()
        );
    }

    println!("正在加载训练数据...");
    let (train, eval) =
        dataset::prepare_datasets(&options.train_file, Some(options.eval_file.as_path()))?;
    println!("训练集大小：{} 条", train.len());
    if let Some(eval) = &eval {
        println!("评估集大小：{} 条", eval.len());
    }

    println!("正在加载模型：{}", options.config.model);
    let tuner = FineTuner::new(options.config.clone(), device);
    println!("开始训练...");
    tuner.run(&train, eval.as_deref())?;

    println!("正在导出GGUF格式...");
    export::export_quantized(&options.config.output_dir, &options.gguf_dir)?;

    println!("训练完成！");
    Ok(())
}
