// SPDX-License-Identifier: MIT OR Apache-2.0

//! Teardown-then-install orchestration.
//!
//! [`apply`] is the single entry point a host pipeline splices in between
//! model loading and the first forward pass:
//!
//! 1. [`HookRegistry::uninstall_all`], unconditionally, so nothing from a
//!    previous run (finished or failed half-way) survives.
//! 2. Resolve the block range of every enabled pathway. A bad range aborts
//!    here, with the registry still empty.
//! 3. For each enabled pathway, block, and non-neutral component: locate
//!    the target and install a [`BoostHook`]. Targets missing from the
//!    model's topology are skipped and reported, not fatal.
//!
//! ```
//! use candle_boost::{BlockLayout, BoostConfig, HookRegistry, ModelTopology, apply};
//!
//! let model = ModelTopology::uniform(40, BlockLayout::full());
//! let mut registry = HookRegistry::new();
//!
//! let json = serde_json::json!({ "audio_v_boost": 2.0 }); // audio, blocks 6-24
//! let config = BoostConfig::from_json(&json).unwrap();
//! let (_model, report) = apply(&model, &config, &mut registry).unwrap();
//! assert_eq!(report.installed, 19);
//! assert_eq!(registry.len(), 19);
//! ```

use std::fmt;

use crate::config::{BoostConfig, BoostMode, ComponentFactors, PathwayConfig, SuppressConfig};
use crate::error::{BoostError, Result};
use crate::hooks::{BoostHook, HookRegistry};
use crate::range::{BlockRange, resolve};
use crate::target::{Component, Pathway};
use crate::topology::{BoostableModel, locate};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// A requested target that the model does not have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTarget {
    /// Requested pathway.
    pub pathway: Pathway,
    /// Requested block.
    pub block: usize,
    /// Requested component.
    pub component: Component,
    /// Why the target was not found.
    pub reason: String,
}

/// Per-pathway breakdown of one [`apply`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct PathwayReport {
    /// The pathway.
    pub pathway: Pathway,
    /// Resolved blocks.
    pub blocks: BlockRange,
    /// Configured factors.
    pub factors: ComponentFactors,
    /// Direction of the factors.
    pub mode: BoostMode,
    /// Hooks installed for this pathway.
    pub installed: usize,
    /// Targets skipped for this pathway.
    pub skipped: usize,
}

/// Outcome of one [`apply`] run.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct BoostReport {
    /// Registry generation the hooks were installed in.
    pub generation: u64,
    /// Hooks removed by the initial teardown.
    pub removed: usize,
    /// Hooks installed.
    pub installed: usize,
    /// Targets skipped because the model lacks them.
    pub skipped: Vec<SkippedTarget>,
    /// Installs that displaced an active handle (expected to stay 0).
    pub conflicts: usize,
    /// Breakdown for each enabled pathway, in [`Pathway::ALL`] order.
    pub pathways: Vec<PathwayReport>,
}

impl BoostReport {
    /// Number of skipped targets.
    #[must_use]
    pub fn num_skipped(&self) -> usize {
        self.skipped.len()
    }

    /// Breakdown for `pathway`, if it was enabled.
    #[must_use]
    pub fn pathway(&self, pathway: Pathway) -> Option<&PathwayReport> {
        self.pathways.iter().find(|report| report.pathway == pathway)
    }
}

impl fmt::Display for BoostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} boost hooks installed, {} skipped",
            self.installed,
            self.skipped.len()
        )?;
        for report in &self.pathways {
            write!(
                f,
                "; {} [{}] blocks {} ({}): {} installed",
                report.pathway,
                report.mode,
                report.blocks,
                report.blocks.len(),
                report.installed
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Tear down, then install the hooks `config` asks for on `model`.
///
/// Returns the same model reference and a [`BoostReport`].
///
/// # Errors
///
/// Returns [`BoostError::Configuration`] if a factor is non-finite or an
/// enabled pathway's block range does not resolve against the model. The
/// registry is left empty in that case. Missing targets are not errors.
pub fn apply<'m, M: BoostableModel + ?Sized>(
    model: &'m M,
    config: &BoostConfig,
    registry: &mut HookRegistry,
) -> Result<(&'m M, BoostReport)> {
    let removed = registry.uninstall_all();

    config.validate()?;
    let topology = model.topology();
    let mut plan: Vec<(Pathway, &PathwayConfig, BlockRange)> = Vec::new();
    for pathway in Pathway::ALL {
        let settings = config.pathway(pathway);
        if settings.enabled {
            let blocks = resolve(&settings.block_range, topology.num_blocks())?;
            plan.push((pathway, settings, blocks));
        }
    }

    let mut report = BoostReport {
        generation: registry.generation(),
        removed,
        installed: 0,
        skipped: Vec::new(),
        conflicts: 0,
        pathways: Vec::with_capacity(plan.len()),
    };

    for (pathway, settings, blocks) in plan {
        let factors = settings.factors;
        tracing::info!(
            pathway = %pathway,
            mode = %factors.mode(),
            blocks = %blocks,
            num_blocks = blocks.len(),
            factors = %factors,
            "boosting pathway"
        );

        let mut installed = 0;
        let mut skipped = 0;
        for block in &blocks {
            for (component, factor) in factors.active() {
                match locate(model, pathway, block, component) {
                    Ok(target) => {
                        if registry.install(BoostHook::new(target, factor)).is_conflict() {
                            report.conflicts += 1;
                        }
                        installed += 1;
                    }
                    Err(BoostError::TopologyMismatch { reason, .. }) => {
                        tracing::warn!(
                            pathway = %pathway,
                            block,
                            component = %component,
                            reason = %reason,
                            "target not in model topology, skipped"
                        );
                        skipped += 1;
                        report.skipped.push(SkippedTarget {
                            pathway,
                            block,
                            component,
                            reason,
                        });
                    }
                    Err(other) => {
                        registry.uninstall_all();
                        return Err(other);
                    }
                }
            }
        }

        report.installed += installed;
        report.pathways.push(PathwayReport {
            pathway,
            blocks,
            factors,
            mode: factors.mode(),
            installed,
            skipped,
        });
    }

    registry.commit();
    tracing::info!(
        installed = report.installed,
        skipped = report.skipped.len(),
        conflicts = report.conflicts,
        removed = report.removed,
        "boost hooks registered"
    );
    Ok((model, report))
}

/// Attenuate the audio output projection over an inclusive block span.
///
/// Runs through [`apply`], so it replaces hooks from any earlier run and is
/// replaced by the next one. A disabled `config` only tears down.
///
/// # Errors
///
/// Same as [`apply`].
pub fn apply_suppression<'m, M: BoostableModel + ?Sized>(
    model: &'m M,
    config: &SuppressConfig,
    registry: &mut HookRegistry,
) -> Result<(&'m M, BoostReport)> {
    tracing::info!(
        enabled = config.enabled,
        strength = config.strength,
        block_start = config.block_start,
        block_end = config.block_end,
        "lip-sync suppression"
    );
    apply(model, &config.to_boost_config(), registry)
}

/// Remove every hook. Returns how many were removed.
pub fn teardown(registry: &mut HookRegistry) -> usize {
    let removed = registry.uninstall_all();
    tracing::info!(removed, "boost hooks removed");
    removed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::hooks::RegistryState;
    use crate::range::{BlockPreset, BlockRangeSpec};
    use crate::target::TargetId;
    use crate::topology::{BlockLayout, ModelTopology};

    fn text_only(range: &str, factors: ComponentFactors) -> BoostConfig {
        BoostConfig::disabled().with_pathway(
            Pathway::TextCross,
            PathwayConfig::enabled(BlockRangeSpec::Custom(range.into()), factors),
        )
    }

    fn id(model: &ModelTopology, pathway: Pathway, block: usize, component: Component) -> TargetId {
        TargetId::new(model.id(), pathway, block, component)
    }

    #[test]
    fn neutral_factors_install_nothing() {
        let model = ModelTopology::uniform(40, BlockLayout::full());
        let mut registry = HookRegistry::new();
        let config = text_only("0-39", ComponentFactors::NEUTRAL);

        let (_, report) = apply(&model, &config, &mut registry).unwrap();
        assert_eq!(report.installed, 0);
        assert!(registry.is_empty());
        assert_eq!(registry.state(), RegistryState::Populated);
        assert_eq!(report.pathway(Pathway::TextCross).unwrap().mode, BoostMode::Neutral);
    }

    #[test]
    fn only_non_neutral_components_install() {
        let model = ModelTopology::uniform(8, BlockLayout::full());
        let mut registry = HookRegistry::new();
        let factors = ComponentFactors::NEUTRAL
            .with(Component::Value, 2.0)
            .with(Component::Output, 0.5);

        let (_, report) = apply(&model, &text_only("2-4", factors), &mut registry).unwrap();
        assert_eq!(report.installed, 6);
        assert_eq!(registry.len(), 6);
        assert_eq!(
            registry.factor_at(&id(&model, Pathway::TextCross, 3, Component::Value)),
            Some(2.0)
        );
        assert!(!registry.is_installed(&id(&model, Pathway::TextCross, 3, Component::Query)));
        assert!(!registry.is_installed(&id(&model, Pathway::TextCross, 5, Component::Value)));
    }

    #[test]
    fn second_apply_replaces_first() {
        let model = ModelTopology::uniform(4, BlockLayout::full());
        let mut registry = HookRegistry::new();
        let target = id(&model, Pathway::TextCross, 1, Component::Key);

        let two = ComponentFactors::NEUTRAL.with(Component::Key, 2.0);
        let three = ComponentFactors::NEUTRAL.with(Component::Key, 3.0);
        let _ = apply(&model, &text_only("1", two), &mut registry).unwrap();
        let (_, report) = apply(&model, &text_only("1", three), &mut registry).unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.conflicts, 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.factor_at(&target), Some(3.0));
    }

    #[test]
    fn all_ones_after_boost_clears_registry() {
        let model = ModelTopology::uniform(40, BlockLayout::full());
        let mut registry = HookRegistry::new();

        let boosted = BoostConfig::from_json(&serde_json::json!({
            "audio_q_boost": 1.5,
            "text_enabled": true,
            "text_v_boost": 2.0,
        }))
        .unwrap();
        let _ = apply(&model, &boosted, &mut registry).unwrap();
        assert!(!registry.is_empty());

        let all_ones = BoostConfig::from_json(&serde_json::json!({
            "text_enabled": true,
            "self_enabled": true,
        }))
        .unwrap();
        let (_, report) = apply(&model, &all_ones, &mut registry).unwrap();
        assert_eq!(report.installed, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn configuration_error_aborts_and_leaves_registry_empty() {
        let model = ModelTopology::uniform(40, BlockLayout::full());
        let mut registry = HookRegistry::new();
        let _ = apply(
            &model,
            &text_only("0-3", ComponentFactors::uniform(2.0)),
            &mut registry,
        )
        .unwrap();
        assert_eq!(registry.len(), 16);

        // Audio is valid and resolved first; self has an inverted range.
        let bad = BoostConfig::disabled()
            .with_pathway(
                Pathway::AudioCross,
                PathwayConfig::enabled(BlockPreset::EarlyBody, ComponentFactors::uniform(2.0)),
            )
            .with_pathway(
                Pathway::SelfAttn,
                PathwayConfig::enabled(
                    BlockRangeSpec::Custom("10-5".into()),
                    ComponentFactors::uniform(2.0),
                ),
            );
        let err = apply(&model, &bad, &mut registry).unwrap_err();
        assert!(matches!(err, BoostError::Configuration(_)));
        assert!(registry.is_empty());
        assert_eq!(registry.state(), RegistryState::Empty);
    }

    #[test]
    fn missing_self_attention_is_skipped_not_fatal() {
        let mut blocks = vec![BlockLayout::full(); 6];
        blocks[2] = BlockLayout::full().without_pathway(Pathway::SelfAttn);
        let model = ModelTopology::new(blocks);
        let mut registry = HookRegistry::new();

        let config = BoostConfig::disabled()
            .with_pathway(
                Pathway::SelfAttn,
                PathwayConfig::enabled(
                    BlockRangeSpec::Custom("0-5".into()),
                    ComponentFactors::NEUTRAL.with(Component::Query, 2.0),
                ),
            )
            .with_pathway(
                Pathway::AudioCross,
                PathwayConfig::enabled(
                    BlockRangeSpec::Custom("0-5".into()),
                    ComponentFactors::NEUTRAL.with(Component::Value, 3.0),
                ),
            );
        let (_, report) = apply(&model, &config, &mut registry).unwrap();

        assert_eq!(report.num_skipped(), 1);
        let skipped = &report.skipped[0];
        assert_eq!(
            (skipped.pathway, skipped.block, skipped.component),
            (Pathway::SelfAttn, 2, Component::Query)
        );
        assert_eq!(report.installed, 5 + 6);
        assert_eq!(report.pathway(Pathway::SelfAttn).unwrap().skipped, 1);
        assert!(registry.is_installed(&id(&model, Pathway::AudioCross, 2, Component::Value)));
        assert!(!registry.is_installed(&id(&model, Pathway::SelfAttn, 2, Component::Query)));
    }

    #[test]
    fn hooks_are_scoped_to_their_model() {
        let a = ModelTopology::uniform(2, BlockLayout::full());
        let b = ModelTopology::uniform(2, BlockLayout::full());
        let mut registry = HookRegistry::new();
        let config = text_only("0", ComponentFactors::NEUTRAL.with(Component::Output, 2.0));

        let _ = apply(&a, &config, &mut registry).unwrap();
        assert!(registry.is_installed(&id(&a, Pathway::TextCross, 0, Component::Output)));
        assert!(!registry.is_installed(&id(&b, Pathway::TextCross, 0, Component::Output)));
    }

    #[test]
    fn suppression_replaces_boost() {
        let model = ModelTopology::uniform(40, BlockLayout::full());
        let mut registry = HookRegistry::new();
        let _ = apply(
            &model,
            &text_only("0-39", ComponentFactors::uniform(2.0)),
            &mut registry,
        )
        .unwrap();

        let (_, report) =
            apply_suppression(&model, &SuppressConfig::default(), &mut registry).unwrap();
        assert_eq!(report.removed, 160);
        assert_eq!(report.installed, 19);
        assert!(registry.handles().iter().all(|h| {
            h.target().pathway == Pathway::AudioCross
                && h.target().component == Component::Output
                && h.factor() == 0.05
        }));

        let off = SuppressConfig {
            enabled: false,
            ..SuppressConfig::default()
        };
        let (_, report) = apply_suppression(&model, &off, &mut registry).unwrap();
        assert_eq!(report.removed, 19);
        assert!(registry.is_empty());
    }

    #[test]
    fn teardown_is_idempotent() {
        let model = ModelTopology::uniform(4, BlockLayout::full());
        let mut registry = HookRegistry::new();
        let _ = apply(
            &model,
            &text_only("0-3", ComponentFactors::uniform(0.5)),
            &mut registry,
        )
        .unwrap();
        assert_eq!(teardown(&mut registry), 16);
        assert_eq!(teardown(&mut registry), 0);
    }

    #[test]
    fn report_display_summarizes() {
        let model = ModelTopology::uniform(40, BlockLayout::full());
        let mut registry = HookRegistry::new();
        let (_, report) = apply(
            &model,
            &text_only("0-10", ComponentFactors::NEUTRAL.with(Component::Value, 2.0)),
            &mut registry,
        )
        .unwrap();
        let text = report.to_string();
        assert!(text.starts_with("11 boost hooks installed, 0 skipped"));
        assert!(text.contains("[BOOST] blocks 0-10 (11)"));
    }
}
