use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use gto_advisor::llm::lora::{LoraConfig, LoraLinear, TARGET_MODULES};

fn base_linear(out_dim: usize, in_dim: usize, device: &Device) -> Linear {
    let weight = Tensor::ones((out_dim, in_dim), DType::F32, device).expect("weight");
    Linear::new(weight, None)
}

#[test]
fn default_config_matches_training_recipe() {
    let config = LoraConfig::default();
    assert_eq!(config.rank, 16);
    assert_eq!(config.alpha, 16.0);
    assert_eq!(config.dropout, Some(0.05));
    assert_eq!(config.scale(), 1.0);
    assert_eq!(config.target_modules.len(), TARGET_MODULES.len());
    assert!(config.targets("q_proj"));
    assert!(config.targets("down_proj"));
    assert!(!config.targets("lm_head"));
}

#[test]
fn fresh_adapter_is_an_identity_on_the_base_output() {
    let device = Device::Cpu;
    let config = LoraConfig {
        dropout: None,
        ..LoraConfig::default()
    };
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let base = base_linear(4, 8, &device);
    let adapted = LoraLinear::adapted(base_linear(4, 8, &device), 8, 4, &config, vb, false)
        .expect("adapter built");

    let xs = Tensor::rand(-1f32, 1f32, (2, 8), &device).expect("input");
    let base_out = base.forward(&xs).expect("base forward");
    let adapted_out = adapted.forward(&xs).expect("adapted forward");

    // lora_b starts at zero, so the delta contributes nothing yet.
    assert_eq!(
        base_out.to_vec2::<f32>().expect("base values"),
        adapted_out.to_vec2::<f32>().expect("adapted values")
    );
}

#[test]
fn weight_delta_has_base_shape_and_starts_at_zero() {
    let device = Device::Cpu;
    let config = LoraConfig {
        dropout: None,
        ..LoraConfig::default()
    };
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let adapted = LoraLinear::adapted(base_linear(4, 8, &device), 8, 4, &config, vb, false)
        .expect("adapter built");
    assert!(adapted.is_adapted());

    let delta = adapted
        .weight_delta()
        .expect("delta computed")
        .expect("adapter present");
    assert_eq!(delta.dims(), &[4, 8]);
    let values = delta.to_vec2::<f32>().expect("delta values");
    assert!(values.iter().flatten().all(|v| *v == 0.0));
}

#[test]
fn frozen_projection_has_no_delta() {
    let device = Device::Cpu;
    let frozen = LoraLinear::frozen(base_linear(4, 8, &device));
    assert!(!frozen.is_adapted());
    assert!(frozen.weight_delta().expect("no delta").is_none());
}
