use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use hf_hub::api::sync::Api;
use tracing::info;

/// Resolved on-disk locations of everything needed to instantiate a model:
/// its configuration, tokenizer and weight shards.
#[derive(Debug, Clone)]
pub struct ModelAssets {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

/// Resolves model assets from a local directory, or from the Hugging Face
/// hub when `model` is not a path to one.
pub fn resolve(model: &str) -> Result<ModelAssets> {
    let as_path = Path::new(model);
    if as_path.is_dir() {
        resolve_local(as_path)
    } else {
        resolve_hub(model)
    }
}

fn resolve_local(dir: &Path) -> Result<ModelAssets> {
    info!(dir = %dir.display(), "loading model assets from local directory");
    let config = existing_file(dir.join("config.json"))?;
    let tokenizer = existing_file(dir.join("tokenizer.json"))?;

    let single = dir.join("model.safetensors");
    let weights = if single.is_file() {
        vec![single]
    } else {
        let index = dir.join("model.safetensors.index.json");
        if index.is_file() {
            sharded_files(&index)?
                .into_iter()
                .map(|name| existing_file(dir.join(name)))
                .collect::<Result<Vec<_>>>()?
        } else {
            let mut found = Vec::new();
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "safetensors") {
                    found.push(path);
                }
            }
            found.sort();
            found
        }
    };

    if weights.is_empty() {
        bail!("no safetensors weights found in {}", dir.display());
    }
    Ok(ModelAssets {
        config,
        tokenizer,
        weights,
    })
}

fn resolve_hub(model_id: &str) -> Result<ModelAssets> {
    info!(model = model_id, "fetching model assets from the Hugging Face hub");
    let api = Api::new().context("initialising hub client")?;
    let repo = api.model(model_id.to_string());

    let config = repo
        .get("config.json")
        .with_context(|| format!("fetching config.json for {model_id}"))?;
    let tokenizer = repo
        .get("tokenizer.json")
        .with_context(|| format!("fetching tokenizer.json for {model_id}"))?;

    let weights = match repo.get("model.safetensors") {
        Ok(single) => vec![single],
        Err(_) => {
            let index = repo
                .get("model.safetensors.index.json")
                .with_context(|| format!("fetching weight index for {model_id}"))?;
            sharded_files(&index)?
                .into_iter()
                .map(|name| {
                    repo.get(&name)
                        .with_context(|| format!("fetching shard {name} for {model_id}"))
                })
                .collect::<Result<Vec<_>>>()?
        }
    };

    Ok(ModelAssets {
        config,
        tokenizer,
        weights,
    })
}

/// Reads the distinct shard file names out of a safetensors index.
fn sharded_files(index_path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(index_path)
        .with_context(|| format!("reading {}", index_path.display()))?;
    let index: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", index_path.display()))?;
    let Some(weight_map) = index.get("weight_map").and_then(|v| v.as_object()) else {
        bail!("{} has no weight_map", index_path.display());
    };
    let names: BTreeSet<String> = weight_map
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    Ok(names.into_iter().collect())
}

fn existing_file(path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        bail!("missing model asset {}", path.display());
    }
}
