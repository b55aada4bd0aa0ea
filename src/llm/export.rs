//! Quantized export of an adapted model.
//!
//! Writes a 4-bit GGUF copy of the merged weights next to the
//! full-precision artifact. Tensor names keep the Hugging Face layout, so
//! the file is addressed to candle's quantized loaders rather than
//! llama.cpp's renamed scheme.

use std::path::Path;

use anyhow::{Context, Result, bail};
use candle_core::quantized::{GgmlDType, QTensor, gguf_file};
use candle_core::{Device, Tensor};
use tracing::info;

/// Tensors quantized below this many elements lose more fidelity than they
/// save; they are stored in full precision instead.
const QUANTIZE_MIN_ELEMENTS: usize = 4096;

/// Quantizes the merged weights of `model_dir` to Q4_K and writes
/// `model.gguf` plus tokenizer assets into `gguf_dir`.
pub fn export_quantized(model_dir: &Path, gguf_dir: &Path) -> Result<()> {
    let weights = model_dir.join("model.safetensors");
    if !weights.is_file() {
        bail!("no merged weights at {}", weights.display());
    }

    let tensors = candle_core::safetensors::load(&weights, &Device::Cpu)?;
    let mut quantized: Vec<(String, QTensor)> = Vec::with_capacity(tensors.len());
    for (name, tensor) in tensors {
        let qtensor = quantize_tensor(&tensor)?;
        quantized.push((name, qtensor));
    }
    quantized.sort_by(|a, b| a.0.cmp(&b.0));

    std::fs::create_dir_all(gguf_dir)
        .with_context(|| format!("creating {}", gguf_dir.display()))?;
    let out_path = gguf_dir.join("model.gguf");
    let mut file = std::fs::File::create(&out_path)
        .with_context(|| format!("creating {}", out_path.display()))?;

    let metadata = [(
        "general.quantization_version",
        gguf_file::Value::U32(2),
    )];
    let metadata_refs: Vec<(&str, &gguf_file::Value)> =
        metadata.iter().map(|(name, value)| (*name, value)).collect();
    let tensor_refs: Vec<(&str, &QTensor)> = quantized
        .iter()
        .map(|(name, tensor)| (name.as_str(), tensor))
        .collect();
    gguf_file::write(&mut file, &metadata_refs, &tensor_refs)
        .with_context(|| format!("writing {}", out_path.display()))?;

    std::fs::copy(model_dir.join("tokenizer.json"), gguf_dir.join("tokenizer.json"))?;
    std::fs::copy(model_dir.join("config.json"), gguf_dir.join("config.json"))?;
    info!(path = %out_path.display(), "quantized export written");
    Ok(())
}

fn quantize_tensor(tensor: &Tensor) -> Result<QTensor> {
    // Q4_K blocks span 256 elements; small or oddly-shaped tensors (norms,
    // biases) stay in full precision.
    let quantizable = tensor.rank() == 2
        && tensor.elem_count() >= QUANTIZE_MIN_ELEMENTS
        && tensor.dim(tensor.rank() - 1)? % 256 == 0;
    let dtype = if quantizable {
        GgmlDType::Q4K
    } else {
        GgmlDType::F32
    };
    let tensor = tensor.to_dtype(candle_core::DType::F32)?;
    Ok(QTensor::quantize(&tensor, dtype)?)
}
