// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests: the teardown-then-install protocol end to end on the
//! reference `DiT` attention stack, on CPU with randomly initialized weights.
//!
//! Run:
//!   `cargo test --test boost_protocol`

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::missing_docs_in_private_items,
    clippy::missing_panics_doc,
    missing_docs
)]

use candle_boost::{
    BlockLayout, BlockPreset, BlockRangeSpec, BoostConfig, BoostError, BoostableModel, Component,
    ComponentFactors, DitAttentionModel, DitConfig, HookRegistry, ModelTopology, Pathway,
    PathwayConfig, RegistryState, SuppressConfig, TargetId, apply, apply_suppression, resolve,
    teardown,
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Model plus fixed random inputs.
struct Fixture {
    model: DitAttentionModel,
    x: Tensor,
    text: Tensor,
    audio: Tensor,
    _varmap: VarMap,
}

impl Fixture {
    fn new(config: &DitConfig) -> Self {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = DitAttentionModel::load(config, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 6, config.hidden_size), &device).unwrap();
        let text = Tensor::randn(0f32, 1.0, (1, 4, config.text_dim), &device).unwrap();
        let audio = Tensor::randn(0f32, 1.0, (1, 5, config.audio_dim), &device).unwrap();
        Self {
            model,
            x,
            text,
            audio,
            _varmap: varmap,
        }
    }

    fn forward(&self, registry: &HookRegistry) -> Tensor {
        self.model
            .forward(&self.x, &self.text, &self.audio, registry)
            .unwrap()
    }
}

/// Largest absolute elementwise difference.
fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b)
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap()
}

fn only(pathway: Pathway, range: &str, factors: ComponentFactors) -> BoostConfig {
    BoostConfig::disabled().with_pathway(
        pathway,
        PathwayConfig::enabled(BlockRangeSpec::Custom(range.into()), factors),
    )
}

fn audio_output(factor: f64) -> BoostConfig {
    only(
        Pathway::AudioCross,
        "0",
        ComponentFactors::NEUTRAL.with(Component::Output, factor),
    )
}

// ---------------------------------------------------------------------------
// Forward-pass effects
// ---------------------------------------------------------------------------

#[test]
fn output_boost_scales_audio_contribution_linearly() {
    // One block: text cross then audio cross, no self-attention.
    let fixture = Fixture::new(&DitConfig {
        self_attn_blocks: Some(Vec::new()),
        ..DitConfig::new(1, 8, 2)
    });
    let mut registry = HookRegistry::new();

    let y1 = fixture.forward(&registry);
    let _ = apply(&fixture.model, &audio_output(2.0), &mut registry).unwrap();
    let y2 = fixture.forward(&registry);
    let _ = apply(&fixture.model, &audio_output(3.0), &mut registry).unwrap();
    let y3 = fixture.forward(&registry);

    // y_f = base + f * audio_delta, so y3 - y1 == 2 * (y2 - y1).
    let lhs = (&y3 - &y1).unwrap();
    let rhs = ((&y2 - &y1).unwrap() * 2.0).unwrap();
    assert!(max_abs_diff(&lhs, &rhs) < 1e-4);
    assert!(max_abs_diff(&y2, &y1) > 1e-4, "boost had no effect");
}

#[test]
fn repeated_apply_does_not_stack() {
    let fixture = Fixture::new(&DitConfig::new(2, 8, 2));

    let mut once = HookRegistry::new();
    let _ = apply(&fixture.model, &audio_output(3.0), &mut once).unwrap();
    let expected = fixture.forward(&once);

    let mut twice = HookRegistry::new();
    let _ = apply(&fixture.model, &audio_output(2.0), &mut twice).unwrap();
    let _ = apply(&fixture.model, &audio_output(3.0), &mut twice).unwrap();
    let actual = fixture.forward(&twice);

    assert_eq!(twice.len(), 1);
    assert_eq!(max_abs_diff(&expected, &actual), 0.0);
}

#[test]
fn teardown_restores_baseline_exactly() {
    let fixture = Fixture::new(&DitConfig::new(3, 8, 2));
    let mut registry = HookRegistry::new();
    let baseline = fixture.forward(&registry);

    let config = only(Pathway::SelfAttn, "0-2", ComponentFactors::uniform(1.7));
    let _ = apply(&fixture.model, &config, &mut registry).unwrap();
    let boosted = fixture.forward(&registry);
    assert!(max_abs_diff(&baseline, &boosted) > 1e-4);

    assert_eq!(teardown(&mut registry), 12);
    assert_eq!(registry.state(), RegistryState::Empty);
    assert_eq!(max_abs_diff(&baseline, &fixture.forward(&registry)), 0.0);
}

#[test]
fn all_neutral_config_matches_unmodified_model() {
    let fixture = Fixture::new(&DitConfig::new(2, 8, 2));
    let mut registry = HookRegistry::new();
    let baseline = fixture.forward(&registry);

    let _ = apply(
        &fixture.model,
        &only(Pathway::TextCross, "0-1", ComponentFactors::uniform(2.0)),
        &mut registry,
    )
    .unwrap();
    assert_eq!(registry.len(), 8);

    let neutral = BoostConfig::disabled()
        .with_pathway(
            Pathway::AudioCross,
            PathwayConfig::enabled(BlockRangeSpec::Custom("0-1".into()), ComponentFactors::NEUTRAL),
        )
        .with_pathway(
            Pathway::TextCross,
            PathwayConfig::enabled(BlockRangeSpec::Custom("0-1".into()), ComponentFactors::NEUTRAL),
        );
    let (_, report) = apply(&fixture.model, &neutral, &mut registry).unwrap();
    assert_eq!(report.installed, 0);
    assert!(registry.is_empty());
    assert_eq!(max_abs_diff(&baseline, &fixture.forward(&registry)), 0.0);
}

// ---------------------------------------------------------------------------
// Protocol outcomes
// ---------------------------------------------------------------------------

#[test]
fn missing_pathway_in_one_block_is_skipped() {
    let fixture = Fixture::new(&DitConfig {
        self_attn_blocks: Some(vec![0, 1, 3]),
        ..DitConfig::new(4, 8, 2)
    });
    let mut registry = HookRegistry::new();
    let config = only(
        Pathway::SelfAttn,
        "0-3",
        ComponentFactors::NEUTRAL.with(Component::Key, 1.5),
    );

    let (model, report) = apply(&fixture.model, &config, &mut registry).unwrap();
    assert_eq!(report.installed, 3);
    assert_eq!(report.num_skipped(), 1);
    assert_eq!(report.skipped[0].block, 2);

    let present = TargetId::new(model.topology().id(), Pathway::SelfAttn, 3, Component::Key);
    assert_eq!(registry.factor_at(&present), Some(1.5));

    // The boosted model still runs.
    let y = fixture.forward(&registry);
    assert_eq!(y.dims(), &[1, 6, 8]);
}

#[test]
fn configuration_error_leaves_registry_empty() {
    let fixture = Fixture::new(&DitConfig::new(4, 8, 2));
    let mut registry = HookRegistry::new();
    let _ = apply(
        &fixture.model,
        &only(Pathway::TextCross, "0-3", ComponentFactors::uniform(2.0)),
        &mut registry,
    )
    .unwrap();

    // Stock audio default (blocks 6-24) does not fit a 4-block model.
    let err = apply(&fixture.model, &BoostConfig::default(), &mut registry).err().unwrap();
    assert!(matches!(err, BoostError::Configuration(_)));
    assert!(registry.is_empty());
    assert_eq!(registry.state(), RegistryState::Empty);
}

#[test]
fn non_finite_factor_is_rejected() {
    let fixture = Fixture::new(&DitConfig::new(1, 8, 2));
    let mut registry = HookRegistry::new();
    let err = apply(&fixture.model, &audio_output(f64::NAN), &mut registry).err().unwrap();
    assert!(matches!(err, BoostError::Configuration(_)));
    assert!(registry.is_empty());
}

#[test]
fn early_body_preset_covers_eleven_blocks() {
    let topology = ModelTopology::uniform(40, BlockLayout::full());
    let blocks = resolve(&BlockRangeSpec::from(BlockPreset::EarlyBody), topology.num_blocks()).unwrap();
    assert_eq!(blocks.len(), 11);
    assert_eq!((blocks.first(), blocks.last()), (Some(0), Some(10)));

    let mut registry = HookRegistry::new();
    let config = BoostConfig::disabled().with_pathway(
        Pathway::AudioCross,
        PathwayConfig::enabled(
            BlockPreset::EarlyBody,
            ComponentFactors::NEUTRAL.with(Component::Value, 2.0),
        ),
    );
    let (_, report) = apply(&topology, &config, &mut registry).unwrap();
    assert_eq!(report.installed, 11);
}

#[test]
fn suppression_then_boost_replaces_hooks() {
    let fixture = Fixture::new(&DitConfig {
        self_attn_blocks: Some(Vec::new()),
        ..DitConfig::new(1, 8, 2)
    });
    let mut registry = HookRegistry::new();
    let baseline = fixture.forward(&registry);

    let suppress = SuppressConfig {
        enabled: true,
        strength: 0.05,
        block_start: 0,
        block_end: 0,
    };
    let (_, report) = apply_suppression(&fixture.model, &suppress, &mut registry).unwrap();
    assert_eq!(report.installed, 1);
    let suppressed = fixture.forward(&registry);
    assert!(max_abs_diff(&baseline, &suppressed) > 1e-4);

    let (_, report) = apply(&fixture.model, &audio_output(1.0), &mut registry).unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(max_abs_diff(&baseline, &fixture.forward(&registry)), 0.0);
}
