use candle_core::{Result, Tensor};
use candle_nn::{Dropout, Init, Linear, Module, VarBuilder};

/// Projections that receive adapters during fine-tuning.
pub const TARGET_MODULES: [&str; 7] = [
    "q_proj",
    "k_proj",
    "v_proj",
    "o_proj",
    "gate_proj",
    "up_proj",
    "down_proj",
];

/// Low-rank adapter hyperparameters.
#[derive(Debug, Clone)]
pub struct LoraConfig {
    pub rank: usize,
    pub alpha: f64,
    pub dropout: Option<f32>,
    pub target_modules: Vec<String>,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            rank: 16,
            alpha: 16.0,
            dropout: Some(0.05),
            target_modules: TARGET_MODULES.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl LoraConfig {
    pub fn scale(&self) -> f64 {
        self.alpha / self.rank as f64
    }

    pub fn targets(&self, module: &str) -> bool {
        self.target_modules.iter().any(|m| m == module)
    }
}

struct Adapter {
    /// Down-projection, shape `(rank, in_dim)`.
    a: Tensor,
    /// Up-projection, shape `(out_dim, rank)`. Zero-initialised so an
    /// untrained adapter is an identity on the base output.
    b: Tensor,
    scale: f64,
    dropout: Option<Dropout>,
    training: bool,
}

/// A linear projection with frozen base weights and an optional trainable
/// low-rank delta: `y = W x + scale * B A x`.
pub struct LoraLinear {
    base: Linear,
    adapter: Option<Adapter>,
}

impl LoraLinear {
    /// Base projection only; used for modules outside the target list and
    /// for inference over merged weights.
    pub fn frozen(base: Linear) -> Self {
        Self {
            base,
            adapter: None,
        }
    }

    /// Wraps the base projection with a trainable rank-`r` adapter whose
    /// variables are registered under `vb`.
    pub fn adapted(
        base: Linear,
        in_dim: usize,
        out_dim: usize,
        config: &LoraConfig,
        vb: VarBuilder,
        training: bool,
    ) -> Result<Self> {
        let a = vb.get_with_hints(
            (config.rank, in_dim),
            "lora_a",
            Init::Randn {
                mean: 0.0,
                stdev: 0.02,
            },
        )?;
        let b = vb.get_with_hints((out_dim, config.rank), "lora_b", Init::Const(0.0))?;
        let dropout = config.dropout.map(Dropout::new);
        Ok(Self {
            base,
            adapter: Some(Adapter {
                a,
                b,
                scale: config.scale(),
                dropout,
                training,
            }),
        })
    }

    pub fn is_adapted(&self) -> bool {
        self.adapter.is_some()
    }

    /// The merged weight delta `scale * B A`, shaped like the base weight,
    /// or `None` for frozen projections.
    pub fn weight_delta(&self) -> Result<Option<Tensor>> {
        match &self.adapter {
            Some(adapter) => {
                let delta = (adapter.b.matmul(&adapter.a)? * adapter.scale)?;
                Ok(Some(delta))
            }
            None => Ok(None),
        }
    }
}

impl Module for LoraLinear {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let base = self.base.forward(xs)?;
        let Some(adapter) = &self.adapter else {
            return Ok(base);
        };
        let xs = match (&adapter.dropout, adapter.training) {
            (Some(dropout), true) => dropout.forward(xs, true)?,
            _ => xs.clone(),
        };
        let delta = xs
            .broadcast_matmul(&adapter.a.t()?)?
            .broadcast_matmul(&adapter.b.t()?)?;
        base + (delta * adapter.scale)?
    }
}
