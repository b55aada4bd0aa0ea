//! Qwen2-family causal decoder built on candle primitives.
//!
//! The decoder exists so the fine-tune loop can thread low-rank adapters
//! through the attention and MLP projections; everything else (tensor
//! algebra, autograd, device dispatch) is candle's. During training the KV
//! cache is disabled and `forward` returns full-sequence logits; during
//! generation the cache carries attention state between decode steps.

use std::sync::Arc;

use candle_core::{D, DType, Device, Result, Tensor};
use candle_nn::{Activation, Embedding, Linear, Module, RmsNorm, VarBuilder};
use candle_transformers::utils::repeat_kv;

use super::lora::{LoraConfig, LoraLinear};

/// Subset of the Hugging Face `config.json` the decoder needs.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    pub max_position_embeddings: usize,
    pub rms_norm_eps: f64,
    pub rope_theta: f64,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    pub hidden_act: Activation,
    #[serde(default)]
    pub eos_token_id: Option<EosTokenId>,
}

/// `eos_token_id` appears in checkpoints both as a single id and as a list.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum EosTokenId {
    Single(u32),
    Multiple(Vec<u32>),
}

impl ModelConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn eos_token_ids(&self) -> Vec<u32> {
        match &self.eos_token_id {
            Some(EosTokenId::Single(id)) => vec![*id],
            Some(EosTokenId::Multiple(ids)) => ids.clone(),
            None => Vec::new(),
        }
    }
}

/// Where adapter variables are registered and how they behave.
#[derive(Clone)]
pub struct AdapterWiring<'a> {
    pub config: &'a LoraConfig,
    pub vb: VarBuilder<'a>,
    pub training: bool,
}

impl AdapterWiring<'_> {
    fn scoped(&self, name: &str) -> Self {
        Self {
            config: self.config,
            vb: self.vb.pp(name),
            training: self.training,
        }
    }
}

fn projection(
    in_dim: usize,
    out_dim: usize,
    bias: bool,
    name: &str,
    vb: &VarBuilder,
    adapters: Option<&AdapterWiring>,
) -> Result<LoraLinear> {
    let base = if bias {
        candle_nn::linear(in_dim, out_dim, vb.pp(name))?
    } else {
        candle_nn::linear_no_bias(in_dim, out_dim, vb.pp(name))?
    };
    match adapters {
        Some(wiring) if wiring.config.targets(name) => LoraLinear::adapted(
            base,
            in_dim,
            out_dim,
            wiring.config,
            wiring.vb.pp(name),
            wiring.training,
        ),
        _ => Ok(LoraLinear::frozen(base)),
    }
}

struct RotaryEmbedding {
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEmbedding {
    fn new(dtype: DType, cfg: &ModelConfig, device: &Device) -> Result<Self> {
        let dim = cfg.head_dim();
        let max_seq_len = cfg.max_position_embeddings;
        let inv_freq: Vec<f32> = (0..dim)
            .step_by(2)
            .map(|i| 1f32 / (cfg.rope_theta as f32).powf(i as f32 / dim as f32))
            .collect();
        let inv_freq_len = inv_freq.len();
        let inv_freq = Tensor::from_vec(inv_freq, (1, inv_freq_len), device)?.to_dtype(dtype)?;
        let t = Tensor::arange(0u32, max_seq_len as u32, device)?
            .to_dtype(dtype)?
            .reshape((max_seq_len, 1))?;
        let freqs = t.matmul(&inv_freq)?;
        Ok(Self {
            cos: freqs.cos()?,
            sin: freqs.sin()?,
        })
    }

    fn apply(&self, q: &Tensor, k: &Tensor, seqlen_offset: usize) -> Result<(Tensor, Tensor)> {
        let (_b, _h, seq_len, _d) = q.dims4()?;
        let cos = self.cos.narrow(0, seqlen_offset, seq_len)?;
        let sin = self.sin.narrow(0, seqlen_offset, seq_len)?;
        let q = candle_nn::rotary_emb::rope(&q.contiguous()?, &cos, &sin)?;
        let k = candle_nn::rotary_emb::rope(&k.contiguous()?, &cos, &sin)?;
        Ok((q, k))
    }
}

struct Attention {
    q_proj: LoraLinear,
    k_proj: LoraLinear,
    v_proj: LoraLinear,
    o_proj: LoraLinear,
    num_heads: usize,
    num_kv_heads: usize,
    num_kv_groups: usize,
    head_dim: usize,
    rotary: Arc<RotaryEmbedding>,
    kv_cache: Option<(Tensor, Tensor)>,
    use_cache: bool,
}

impl Attention {
    fn new(
        cfg: &ModelConfig,
        vb: VarBuilder,
        adapters: Option<&AdapterWiring>,
        rotary: Arc<RotaryEmbedding>,
        use_cache: bool,
    ) -> Result<Self> {
        let hidden = cfg.hidden_size;
        let head_dim = cfg.head_dim();
        let q_dim = cfg.num_attention_heads * head_dim;
        let kv_dim = cfg.num_key_value_heads * head_dim;
        Ok(Self {
            q_proj: projection(hidden, q_dim, true, "q_proj", &vb, adapters)?,
            k_proj: projection(hidden, kv_dim, true, "k_proj", &vb, adapters)?,
            v_proj: projection(hidden, kv_dim, true, "v_proj", &vb, adapters)?,
            o_proj: projection(q_dim, hidden, false, "o_proj", &vb, adapters)?,
            num_heads: cfg.num_attention_heads,
            num_kv_heads: cfg.num_key_value_heads,
            num_kv_groups: cfg.num_attention_heads / cfg.num_key_value_heads,
            head_dim,
            rotary,
            kv_cache: None,
            use_cache,
        })
    }

    fn forward(
        &mut self,
        xs: &Tensor,
        attention_mask: Option<&Tensor>,
        seqlen_offset: usize,
    ) -> Result<Tensor> {
        let (b, seq_len, _) = xs.dims3()?;

        let q = self.q_proj.forward(xs)?;
        let k = self.k_proj.forward(xs)?;
        let v = self.v_proj.forward(xs)?;

        let q = q
            .reshape((b, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = k
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = v
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (q, k) = self.rotary.apply(&q, &k, seqlen_offset)?;

        let (k, v) = if self.use_cache {
            let (k, v) = match &self.kv_cache {
                None => (k, v),
                Some((prev_k, prev_v)) => (
                    Tensor::cat(&[prev_k, &k], 2)?,
                    Tensor::cat(&[prev_v, &v], 2)?,
                ),
            };
            self.kv_cache = Some((k.clone(), v.clone()));
            (k, v)
        } else {
            (k, v)
        };

        let k = repeat_kv(k, self.num_kv_groups)?.contiguous()?;
        let v = repeat_kv(v, self.num_kv_groups)?.contiguous()?;

        let scale = 1f64 / (self.head_dim as f64).sqrt();
        let attn_weights = (q.matmul(&k.transpose(2, 3)?)? * scale)?;
        let attn_weights = match attention_mask {
            None => attn_weights,
            Some(mask) => attn_weights.broadcast_add(mask)?,
        };
        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights)?;
        let attn_output = attn_weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, seq_len, self.num_heads * self.head_dim))?;
        self.o_proj.forward(&attn_output)
    }

    fn clear_kv_cache(&mut self) {
        self.kv_cache = None;
    }
}

struct Mlp {
    gate_proj: LoraLinear,
    up_proj: LoraLinear,
    down_proj: LoraLinear,
    act: Activation,
}

impl Mlp {
    fn new(cfg: &ModelConfig, vb: VarBuilder, adapters: Option<&AdapterWiring>) -> Result<Self> {
        let hidden = cfg.hidden_size;
        let intermediate = cfg.intermediate_size;
        Ok(Self {
            gate_proj: projection(hidden, intermediate, false, "gate_proj", &vb, adapters)?,
            up_proj: projection(hidden, intermediate, false, "up_proj", &vb, adapters)?,
            down_proj: projection(intermediate, hidden, false, "down_proj", &vb, adapters)?,
            act: cfg.hidden_act,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let gated = self.gate_proj.forward(xs)?.apply(&self.act)?;
        let up = self.up_proj.forward(xs)?;
        self.down_proj.forward(&(gated * up)?)
    }
}

struct DecoderLayer {
    self_attn: Attention,
    mlp: Mlp,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
}

impl DecoderLayer {
    fn new(
        cfg: &ModelConfig,
        vb: VarBuilder,
        adapters: Option<&AdapterWiring>,
        rotary: Arc<RotaryEmbedding>,
        use_cache: bool,
    ) -> Result<Self> {
        let attn_adapters = adapters.map(|w| w.scoped("self_attn"));
        let mlp_adapters = adapters.map(|w| w.scoped("mlp"));
        Ok(Self {
            self_attn: Attention::new(
                cfg,
                vb.pp("self_attn"),
                attn_adapters.as_ref(),
                rotary,
                use_cache,
            )?,
            mlp: Mlp::new(cfg, vb.pp("mlp"), mlp_adapters.as_ref())?,
            input_layernorm: candle_nn::rms_norm(
                cfg.hidden_size,
                cfg.rms_norm_eps,
                vb.pp("input_layernorm"),
            )?,
            post_attention_layernorm: candle_nn::rms_norm(
                cfg.hidden_size,
                cfg.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
        })
    }

    fn forward(
        &mut self,
        xs: &Tensor,
        attention_mask: Option<&Tensor>,
        seqlen_offset: usize,
    ) -> Result<Tensor> {
        let residual = xs;
        let xs = self.input_layernorm.forward(xs)?;
        let xs = self.self_attn.forward(&xs, attention_mask, seqlen_offset)?;
        let xs = (residual + xs)?;
        let residual = &xs;
        let normed = self.post_attention_layernorm.forward(&xs)?;
        let mlp_out = self.mlp.forward(&normed)?;
        residual + mlp_out
    }
}

/// The decoder with its embedding, layer stack and LM head.
pub struct AdvisorModel {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    lm_head: Linear,
    device: Device,
    dtype: DType,
}

impl AdvisorModel {
    /// Builds the decoder from base weights under `vb`, optionally wiring
    /// low-rank adapters into the target projections. `use_cache` selects
    /// between generation (cached) and training (uncached) attention.
    pub fn new(
        cfg: &ModelConfig,
        vb: VarBuilder,
        adapters: Option<AdapterWiring>,
        use_cache: bool,
    ) -> Result<Self> {
        let model_vb = vb.pp("model");
        let embed_tokens =
            candle_nn::embedding(cfg.vocab_size, cfg.hidden_size, model_vb.pp("embed_tokens"))?;
        let rotary = Arc::new(RotaryEmbedding::new(vb.dtype(), cfg, vb.device())?);

        let layers_vb = model_vb.pp("layers");
        let layer_adapters = adapters.map(|w| AdapterWiring {
            config: w.config,
            vb: w.vb.pp("model").pp("layers"),
            training: w.training,
        });
        let mut layers = Vec::with_capacity(cfg.num_hidden_layers);
        for i in 0..cfg.num_hidden_layers {
            let wiring = layer_adapters.as_ref().map(|w| w.scoped(&i.to_string()));
            layers.push(DecoderLayer::new(
                cfg,
                layers_vb.pp(i.to_string()),
                wiring.as_ref(),
                rotary.clone(),
                use_cache,
            )?);
        }

        let norm = candle_nn::rms_norm(cfg.hidden_size, cfg.rms_norm_eps, model_vb.pp("norm"))?;
        let lm_head = if cfg.tie_word_embeddings {
            Linear::new(embed_tokens.embeddings().clone(), None)
        } else {
            candle_nn::linear_no_bias(cfg.hidden_size, cfg.vocab_size, vb.pp("lm_head"))?
        };

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            device: vb.device().clone(),
            dtype: vb.dtype(),
        })
    }

    /// Full-sequence logits, shape `(batch, seq_len, vocab)`.
    pub fn forward(&mut self, input_ids: &Tensor, seqlen_offset: usize) -> Result<Tensor> {
        let (b, seq_len) = input_ids.dims2()?;
        let mut xs = self.embed_tokens.forward(input_ids)?;
        let attention_mask = if seq_len <= 1 {
            None
        } else {
            Some(self.causal_mask(b, seq_len, seqlen_offset)?)
        };
        for layer in &mut self.layers {
            xs = layer.forward(&xs, attention_mask.as_ref(), seqlen_offset)?;
        }
        let xs = self.norm.forward(&xs)?;
        self.lm_head.forward(&xs)
    }

    /// Logits for the final position only, shape `(batch, vocab)`.
    pub fn forward_last(&mut self, input_ids: &Tensor, seqlen_offset: usize) -> Result<Tensor> {
        let (_b, seq_len) = input_ids.dims2()?;
        let logits = self.forward(input_ids, seqlen_offset)?;
        logits.narrow(1, seq_len - 1, 1)?.squeeze(1)
    }

    pub fn clear_kv_cache(&mut self) {
        for layer in &mut self.layers {
            layer.self_attn.clear_kv_cache();
        }
    }

    /// Merged weight deltas keyed by the base tensor name, for persisting
    /// adapted weights.
    pub fn adapter_deltas(&self) -> Result<Vec<(String, Tensor)>> {
        let mut deltas = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let attn = &layer.self_attn;
            let mlp = &layer.mlp;
            let named: [(&str, &LoraLinear); 7] = [
                ("self_attn.q_proj", &attn.q_proj),
                ("self_attn.k_proj", &attn.k_proj),
                ("self_attn.v_proj", &attn.v_proj),
                ("self_attn.o_proj", &attn.o_proj),
                ("mlp.gate_proj", &mlp.gate_proj),
                ("mlp.up_proj", &mlp.up_proj),
                ("mlp.down_proj", &mlp.down_proj),
            ];
            for (name, linear) in named {
                if let Some(delta) = linear.weight_delta()? {
                    deltas.push((format!("model.layers.{i}.{name}.weight"), delta));
                }
            }
        }
        Ok(deltas)
    }

    fn causal_mask(&self, b: usize, seq_len: usize, seqlen_offset: usize) -> Result<Tensor> {
        let mask: Vec<f32> = (0..seq_len)
            .flat_map(|i| {
                (0..seq_len).map(move |j| if j > i { f32::NEG_INFINITY } else { 0f32 })
            })
            .collect();
        let mask = Tensor::from_vec(mask, (seq_len, seq_len), &self.device)?;
        let mask = if seqlen_offset > 0 {
            let prefix = Tensor::zeros((seq_len, seqlen_offset), DType::F32, &self.device)?;
            Tensor::cat(&[&prefix, &mask], D::Minus1)?
        } else {
            mask
        };
        mask.expand((b, 1, seq_len, seq_len + seqlen_offset))?
            .to_dtype(self.dtype)
    }
}
