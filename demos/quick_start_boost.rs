// SPDX-License-Identifier: MIT OR Apache-2.0

//! Quick start: boost audio cross-attention on a small `DiT`, then tear down.
//!
//! ```bash
//! RUST_LOG=debug cargo run --example quick_start_boost
//! ```
//!
//! Builds a randomly initialized 8-block `DiT` attention stack on CPU, applies
//! a boost configuration given as JSON, compares the boosted forward pass
//! against the unboosted one, and removes the hooks again.

use candle_boost::{
    BoostConfig, DitAttentionModel, DitConfig, HookRegistry, SuppressConfig, apply,
    apply_suppression, teardown,
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use tracing_subscriber::EnvFilter;

fn main() -> candle_boost::Result<()> {
    // 1. Structured logs to stderr, filtered by `RUST_LOG` (default: info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Build the model; self-attention only in even blocks
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let dit_config = DitConfig::from_json(&serde_json::json!({
        "num_blocks": 8,
        "hidden_size": 32,
        "num_heads": 4,
        "text_dim": 24,
        "audio_dim": 16,
        "self_attn_blocks": [0, 2, 4, 6],
    }))?;
    let model = DitAttentionModel::load(&dit_config, vb)?;

    let x = Tensor::randn(0f32, 1.0, (1, 10, 32), &device)?;
    let text = Tensor::randn(0f32, 1.0, (1, 6, 24), &device)?;
    let audio = Tensor::randn(0f32, 1.0, (1, 12, 16), &device)?;

    // 3. Baseline forward pass (empty registry)
    let mut registry = HookRegistry::new();
    let baseline = model.forward(&x, &text, &audio, &registry)?;

    // 4. Boost audio V/O over blocks 0-5, self-attention Q over 0-7
    //    (blocks 1, 3, 5, 7 have no self-attention and are skipped)
    let config = BoostConfig::from_json(&serde_json::json!({
        "audio_v_boost": 2.0,
        "audio_o_boost": 1.5,
        "audio_block_range": "early_0-5_structure",
        "self_enabled": true,
        "self_q_boost": 1.25,
        "self_block_range": "custom",
        "self_custom_range": "0-7",
    }))?;
    let (model, report) = apply(&model, &config, &mut registry)?;
    println!("{report}");
    for skipped in &report.skipped {
        println!(
            "  skipped {} {} at block {}: {}",
            skipped.pathway, skipped.component, skipped.block, skipped.reason
        );
    }

    let boosted = model.forward(&x, &text, &audio, &registry)?;
    println!(
        "max |boosted - baseline| = {:.4}",
        max_abs_diff(&boosted, &baseline)?
    );

    // 5. Switch to lip-sync suppression (replaces the boost hooks)
    let suppress = SuppressConfig {
        block_start: 2,
        block_end: 5,
        ..SuppressConfig::default()
    };
    let (model, report) = apply_suppression(model, &suppress, &mut registry)?;
    println!("{report}");

    // 6. Tear down: the model is back to its loaded behavior
    let removed = teardown(&mut registry);
    let restored = model.forward(&x, &text, &audio, &registry)?;
    println!(
        "removed {removed} hooks, max |restored - baseline| = {:.4}",
        max_abs_diff(&restored, &baseline)?
    );

    Ok(())
}

/// Largest absolute elementwise difference.
fn max_abs_diff(a: &Tensor, b: &Tensor) -> candle_boost::Result<f32> {
    Ok((a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?)
}
