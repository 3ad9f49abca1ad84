// SPDX-License-Identifier: MIT OR Apache-2.0

//! Boost configuration and JSON parsing.
//!
//! [`BoostConfig`] holds one [`PathwayConfig`] per attention pathway: an
//! enabled flag, four [`ComponentFactors`] and a block-range selection.
//! A factor of exactly `1.0` is neutral and never produces a hook.
//!
//! # JSON schema
//!
//! For each pathway prefix `p` in `audio`, `text`, `self`:
//!
//! | Key | Type | Default |
//! |-----|------|---------|
//! | `{p}_enabled` | bool | `true` for audio, `false` otherwise |
//! | `{p}_q_boost`, `{p}_k_boost`, `{p}_v_boost`, `{p}_o_boost` | number | `1.0` |
//! | `{p}_block_range` | preset name, `"custom"`, or `"start-end"` text | `mid_6-24_lipsync` for audio, `early_0-10_body` otherwise |
//! | `{p}_custom_range` | range text, used when `{p}_block_range` is `"custom"` | `"6-24"` for audio, `"0-10"` otherwise |
//!
//! ```
//! use candle_boost::{BoostConfig, Component, Pathway};
//!
//! let json = serde_json::json!({
//!     "audio_v_boost": 3.0,
//!     "audio_block_range": "early_0-10_body",
//!     "self_enabled": true,
//!     "self_o_boost": 0.5,
//!     "self_block_range": "custom",
//!     "self_custom_range": "0-5,25-39",
//! });
//! let config = BoostConfig::from_json(&json).unwrap();
//! assert!(config.pathway(Pathway::AudioCross).enabled);
//! assert!((config.pathway(Pathway::SelfAttn).factors.get(Component::Output) - 0.5).abs() < 1e-12);
//! ```

use std::fmt;

use serde_json::Value;

use crate::error::{BoostError, Result};
use crate::range::{BlockPreset, BlockRangeSpec};
use crate::target::{Component, Pathway};

/// Neutral boost factor.
pub const NEUTRAL_FACTOR: f64 = 1.0;

/// Whether `factor` is exactly neutral (and must not produce a hook).
#[must_use]
#[allow(clippy::float_cmp)] // exact comparison: only a literal 1.0 is elided
pub fn is_neutral(factor: f64) -> bool {
    factor == NEUTRAL_FACTOR
}

// ---------------------------------------------------------------------------
// BoostMode
// ---------------------------------------------------------------------------

/// Overall direction of a pathway's factors.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostMode {
    /// Every factor is exactly `1.0`.
    Neutral,
    /// No factor below `1.0`, at least one above.
    Boost,
    /// No factor above `1.0`, at least one below.
    Suppress,
    /// Some factors above `1.0` and some below.
    Mixed,
}

impl fmt::Display for BoostMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::Boost => write!(f, "BOOST"),
            Self::Suppress => write!(f, "SUPPRESS"),
            Self::Mixed => write!(f, "MIXED"),
        }
    }
}

// ---------------------------------------------------------------------------
// ComponentFactors
// ---------------------------------------------------------------------------

/// Boost factors for the four projections of one pathway.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentFactors {
    /// Query factor.
    pub q: f64,
    /// Key factor.
    pub k: f64,
    /// Value factor.
    pub v: f64,
    /// Output factor.
    pub o: f64,
}

impl ComponentFactors {
    /// All factors neutral.
    pub const NEUTRAL: Self = Self::uniform(NEUTRAL_FACTOR);

    /// The same factor on every projection.
    #[must_use]
    pub const fn uniform(factor: f64) -> Self {
        Self {
            q: factor,
            k: factor,
            v: factor,
            o: factor,
        }
    }

    /// Factor for `component`.
    #[must_use]
    pub const fn get(&self, component: Component) -> f64 {
        match component {
            Component::Query => self.q,
            Component::Key => self.k,
            Component::Value => self.v,
            Component::Output => self.o,
        }
    }

    /// These factors with `component` set to `factor`.
    #[must_use]
    pub const fn with(mut self, component: Component, factor: f64) -> Self {
        match component {
            Component::Query => self.q = factor,
            Component::Key => self.k = factor,
            Component::Value => self.v = factor,
            Component::Output => self.o = factor,
        }
        self
    }

    /// `(component, factor)` pairs in [`Component::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Component, f64)> + '_ {
        Component::ALL.into_iter().map(|c| (c, self.get(c)))
    }

    /// `(component, factor)` pairs whose factor is not neutral.
    pub fn active(&self) -> impl Iterator<Item = (Component, f64)> + '_ {
        self.iter().filter(|(_, factor)| !is_neutral(*factor))
    }

    /// Whether every factor is neutral.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.active().next().is_none()
    }

    /// Overall direction of the factors.
    #[must_use]
    pub fn mode(&self) -> BoostMode {
        let up = self.iter().any(|(_, f)| f > NEUTRAL_FACTOR);
        let down = self.iter().any(|(_, f)| f < NEUTRAL_FACTOR);
        match (up, down) {
            (false, false) => BoostMode::Neutral,
            (true, false) => BoostMode::Boost,
            (false, true) => BoostMode::Suppress,
            (true, true) => BoostMode::Mixed,
        }
    }
}

impl Default for ComponentFactors {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl fmt::Display for ComponentFactors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Q: {}x | K: {}x | V: {}x | O: {}x",
            self.q, self.k, self.v, self.o
        )
    }
}

// ---------------------------------------------------------------------------
// PathwayConfig
// ---------------------------------------------------------------------------

/// Settings for one pathway.
#[derive(Debug, Clone, PartialEq)]
pub struct PathwayConfig {
    /// Whether this pathway is boosted at all.
    pub enabled: bool,
    /// Per-projection factors.
    pub factors: ComponentFactors,
    /// Blocks to boost.
    pub block_range: BlockRangeSpec,
}

impl PathwayConfig {
    /// An enabled pathway.
    #[must_use]
    pub fn enabled(block_range: impl Into<BlockRangeSpec>, factors: ComponentFactors) -> Self {
        Self {
            enabled: true,
            factors,
            block_range: block_range.into(),
        }
    }

    /// A disabled pathway with neutral factors.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            factors: ComponentFactors::NEUTRAL,
            block_range: BlockRangeSpec::Preset(BlockPreset::EarlyBody),
        }
    }

    /// Check that every factor is finite.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Configuration`] on a NaN or infinite factor.
    pub fn validate(&self, pathway: Pathway) -> Result<()> {
        for (component, factor) in self.factors.iter() {
            if !factor.is_finite() {
                return Err(BoostError::Configuration(format!(
                    "{}_{}_boost must be finite, got {factor}",
                    pathway.config_key(),
                    component
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BoostConfig
// ---------------------------------------------------------------------------

/// Boost settings for all three pathways.
///
/// [`Default`] matches the stock node defaults: audio enabled over
/// `mid_6-24_lipsync`, text and self disabled, every factor neutral.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostConfig {
    /// Audio cross-attention.
    pub audio: PathwayConfig,
    /// Text cross-attention.
    pub text: PathwayConfig,
    /// Self-attention.
    pub self_attn: PathwayConfig,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            audio: PathwayConfig {
                enabled: true,
                factors: ComponentFactors::NEUTRAL,
                block_range: BlockRangeSpec::Preset(BlockPreset::MidLipsync),
            },
            text: PathwayConfig::disabled(),
            self_attn: PathwayConfig::disabled(),
        }
    }
}

impl BoostConfig {
    /// Every pathway disabled. Applying this only tears down.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            audio: PathwayConfig::disabled(),
            text: PathwayConfig::disabled(),
            self_attn: PathwayConfig::disabled(),
        }
    }

    /// Settings for `pathway`.
    #[must_use]
    pub const fn pathway(&self, pathway: Pathway) -> &PathwayConfig {
        match pathway {
            Pathway::AudioCross => &self.audio,
            Pathway::TextCross => &self.text,
            Pathway::SelfAttn => &self.self_attn,
        }
    }

    /// Mutable settings for `pathway`.
    pub fn pathway_mut(&mut self, pathway: Pathway) -> &mut PathwayConfig {
        match pathway {
            Pathway::AudioCross => &mut self.audio,
            Pathway::TextCross => &mut self.text,
            Pathway::SelfAttn => &mut self.self_attn,
        }
    }

    /// This config with `pathway` replaced.
    #[must_use]
    pub fn with_pathway(mut self, pathway: Pathway, config: PathwayConfig) -> Self {
        *self.pathway_mut(pathway) = config;
        self
    }

    /// Check every pathway's factors.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Configuration`] on a non-finite factor.
    pub fn validate(&self) -> Result<()> {
        for pathway in Pathway::ALL {
            self.pathway(pathway).validate(pathway)?;
        }
        Ok(())
    }

    /// Parse from a flat JSON object (see the module docs for the schema).
    ///
    /// Absent or `null` keys take their defaults; unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Configuration`] if `config` is not an object,
    /// a key has the wrong type, a factor is non-finite, or an enabled
    /// pathway's block-range selection names an unknown preset.
    pub fn from_json(config: &Value) -> Result<Self> {
        if !config.is_object() {
            return Err(BoostError::Configuration(
                "boost config must be a JSON object".into(),
            ));
        }
        let defaults = Self::default();
        let mut parsed = Self::disabled();
        for pathway in Pathway::ALL {
            let default = defaults.pathway(pathway);
            *parsed.pathway_mut(pathway) = parse_pathway(config, pathway, default)?;
        }
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Default custom range text for `pathway`.
const fn default_custom_range(pathway: Pathway) -> &'static str {
    match pathway {
        Pathway::AudioCross => "6-24",
        Pathway::TextCross | Pathway::SelfAttn => "0-10",
    }
}

/// Parse one pathway's keys.
fn parse_pathway(config: &Value, pathway: Pathway, default: &PathwayConfig) -> Result<PathwayConfig> {
    let p = pathway.config_key();

    let enabled = get_bool_or(config, &format!("{p}_enabled"), default.enabled)?;
    let mut factors = default.factors;
    for component in Component::ALL {
        let key = format!("{p}_{component}_boost");
        factors = factors.with(component, get_f64_or(config, &key, factors.get(component))?);
    }

    let default_selection = default.block_range.to_string();
    let selection = get_str_or(config, &format!("{p}_block_range"), &default_selection)?;
    let custom = get_str_or(
        config,
        &format!("{p}_custom_range"),
        default_custom_range(pathway),
    )?;
    let block_range = match BlockRangeSpec::from_selection(selection, custom) {
        Ok(spec) => spec,
        Err(err) if enabled => return Err(err),
        Err(err) => {
            // Disabled pathways never resolve their range.
            tracing::debug!(
                pathway = %pathway,
                error = %err,
                "ignoring block range of disabled pathway"
            );
            default.block_range.clone()
        }
    };

    Ok(PathwayConfig {
        enabled,
        factors,
        block_range,
    })
}

// ---------------------------------------------------------------------------
// SuppressConfig
// ---------------------------------------------------------------------------

/// One-knob lip-sync suppression: attenuate the audio cross-attention
/// output projection over an inclusive block span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuppressConfig {
    /// Whether to suppress at all. When `false`, applying only tears down.
    pub enabled: bool,
    /// Factor on the audio output projection. Lower suppresses more.
    pub strength: f64,
    /// First suppressed block (inclusive).
    pub block_start: usize,
    /// Last suppressed block (inclusive).
    pub block_end: usize,
}

impl Default for SuppressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strength: 0.05,
            block_start: 6,
            block_end: 24,
        }
    }
}

impl SuppressConfig {
    /// Express this as a [`BoostConfig`].
    #[must_use]
    pub fn to_boost_config(&self) -> BoostConfig {
        if !self.enabled {
            return BoostConfig::disabled();
        }
        BoostConfig::disabled().with_pathway(
            Pathway::AudioCross,
            PathwayConfig::enabled(
                BlockRangeSpec::Custom(format!("{}-{}", self.block_start, self.block_end)),
                ComponentFactors::NEUTRAL.with(Component::Output, self.strength),
            ),
        )
    }

    /// Parse from JSON keys `enabled`, `suppression_strength`,
    /// `block_start`, `block_end`.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Configuration`] if `config` is not an object or
    /// a key has the wrong type.
    pub fn from_json(config: &Value) -> Result<Self> {
        if !config.is_object() {
            return Err(BoostError::Configuration(
                "suppress config must be a JSON object".into(),
            ));
        }
        let defaults = Self::default();
        Ok(Self {
            enabled: get_bool_or(config, "enabled", defaults.enabled)?,
            strength: get_f64_or(config, "suppression_strength", defaults.strength)?,
            block_start: get_usize_or(config, "block_start", defaults.block_start)?,
            block_end: get_usize_or(config, "block_end", defaults.block_end)?,
        })
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// Look up `key`, treating `null` as absent.
pub(crate) fn lookup<'a>(config: &'a Value, key: &str) -> Option<&'a Value> {
    config.get(key).filter(|v| !v.is_null())
}

/// Error for a present key of the wrong type.
pub(crate) fn wrong_type(key: &str, expected: &str, found: &Value) -> BoostError {
    BoostError::Configuration(format!("field '{key}' must be {expected}, got {found}"))
}

/// Extract a `bool` field, returning a default if absent.
fn get_bool_or(config: &Value, key: &str, default: bool) -> Result<bool> {
    lookup(config, key).map_or(Ok(default), |v| {
        v.as_bool().ok_or_else(|| wrong_type(key, "a boolean", v))
    })
}

/// Extract an `f64` field, returning a default if absent.
fn get_f64_or(config: &Value, key: &str, default: f64) -> Result<f64> {
    lookup(config, key).map_or(Ok(default), |v| {
        v.as_f64().ok_or_else(|| wrong_type(key, "a number", v))
    })
}

/// Extract a string field, returning a default if absent.
fn get_str_or<'a>(config: &'a Value, key: &str, default: &'a str) -> Result<&'a str> {
    lookup(config, key).map_or(Ok(default), |v| {
        v.as_str().ok_or_else(|| wrong_type(key, "a string", v))
    })
}

/// Extract a `usize` field, returning a default if absent.
pub(crate) fn get_usize_or(config: &Value, key: &str, default: usize) -> Result<usize> {
    lookup(config, key).map_or(Ok(default), |v| {
        v.as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| wrong_type(key, "a non-negative integer", v))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::hooks::HookRegistry;
    use crate::topology::{BlockLayout, ModelTopology};

    #[test]
    fn defaults_match_stock_node() {
        let config = BoostConfig::from_json(&serde_json::json!({})).unwrap();
        assert_eq!(config, BoostConfig::default());
        assert!(config.audio.enabled);
        assert!(!config.text.enabled);
        assert!(!config.self_attn.enabled);
        assert_eq!(
            config.audio.block_range,
            BlockRangeSpec::Preset(BlockPreset::MidLipsync)
        );
        assert!(config.audio.factors.is_neutral());
    }

    #[test]
    fn full_schema_parses() {
        let json = serde_json::json!({
            "audio_enabled": false,
            "text_enabled": true,
            "text_q_boost": 2.0,
            "text_k_boost": 1,
            "text_v_boost": 0.25,
            "text_o_boost": 4.5,
            "text_block_range": "0-3",
            "self_enabled": true,
            "self_block_range": "custom",
            "self_custom_range": "1,5-6",
        });
        let config = BoostConfig::from_json(&json).unwrap();

        assert!(!config.audio.enabled);
        assert_eq!(
            config.text.factors,
            ComponentFactors {
                q: 2.0,
                k: 1.0,
                v: 0.25,
                o: 4.5
            }
        );
        assert_eq!(config.text.block_range, BlockRangeSpec::Custom("0-3".into()));
        assert_eq!(
            config.self_attn.block_range,
            BlockRangeSpec::Custom("1,5-6".into())
        );
    }

    #[test]
    fn disabled_pathway_ignores_unknown_preset() {
        let json = serde_json::json!({ "text_enabled": false, "text_block_range": "bogus" });
        let config = BoostConfig::from_json(&json).unwrap();
        assert!(!config.text.enabled);
        assert_eq!(
            config.text.block_range,
            BlockRangeSpec::Preset(BlockPreset::EarlyBody)
        );

        let model = ModelTopology::uniform(40, BlockLayout::full());
        let mut registry = HookRegistry::new();
        let (_, report) = crate::orchestrator::apply(&model, &config, &mut registry).unwrap();
        assert!(report.pathway(Pathway::TextCross).is_none());

        let enabled = serde_json::json!({ "text_enabled": true, "text_block_range": "bogus" });
        assert!(matches!(
            BoostConfig::from_json(&enabled),
            Err(BoostError::Configuration(_))
        ));
    }

    #[test]
    fn custom_selection_uses_default_custom_text() {
        let json = serde_json::json!({ "audio_block_range": "custom" });
        let config = BoostConfig::from_json(&json).unwrap();
        assert_eq!(config.audio.block_range, BlockRangeSpec::Custom("6-24".into()));
    }

    #[test]
    fn wrong_types_rejected() {
        for json in [
            serde_json::json!({ "audio_enabled": "yes" }),
            serde_json::json!({ "audio_q_boost": "2.0" }),
            serde_json::json!({ "text_block_range": 5 }),
            serde_json::json!({ "self_block_range": "sideways" }),
            serde_json::json!([1, 2, 3]),
        ] {
            assert!(
                matches!(BoostConfig::from_json(&json), Err(BoostError::Configuration(_))),
                "{json}"
            );
        }
    }

    #[test]
    fn non_finite_factor_rejected() {
        let config = BoostConfig::default().with_pathway(
            Pathway::TextCross,
            PathwayConfig::enabled(BlockPreset::EarlyBody, ComponentFactors::uniform(f64::NAN)),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn modes() {
        assert_eq!(ComponentFactors::NEUTRAL.mode(), BoostMode::Neutral);
        assert_eq!(ComponentFactors::uniform(2.0).mode(), BoostMode::Boost);
        assert_eq!(
            ComponentFactors::NEUTRAL.with(Component::Value, 0.05).mode(),
            BoostMode::Suppress
        );
        assert_eq!(
            ComponentFactors::uniform(0.5).with(Component::Query, 3.0).mode(),
            BoostMode::Mixed
        );
    }

    #[test]
    fn active_skips_exact_neutral_only() {
        let factors = ComponentFactors::NEUTRAL
            .with(Component::Key, 1.000_001)
            .with(Component::Output, 0.0);
        let active: Vec<Component> = factors.active().map(|(c, _)| c).collect();
        assert_eq!(active, vec![Component::Key, Component::Output]);
    }

    #[test]
    fn suppress_config_targets_audio_output_only() {
        let boost = SuppressConfig::default().to_boost_config();
        assert!(boost.audio.enabled);
        assert!(!boost.text.enabled && !boost.self_attn.enabled);
        assert_eq!(boost.audio.factors.o, 0.05);
        assert!(boost.audio.factors.with(Component::Output, 1.0).is_neutral());
        assert_eq!(boost.audio.block_range, BlockRangeSpec::Custom("6-24".into()));

        let off = SuppressConfig {
            enabled: false,
            ..SuppressConfig::default()
        };
        assert_eq!(off.to_boost_config(), BoostConfig::disabled());
    }

    #[test]
    fn suppress_config_from_json() {
        let json = serde_json::json!({
            "suppression_strength": 0.2,
            "block_start": 10,
            "block_end": 12,
        });
        let config = SuppressConfig::from_json(&json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.strength, 0.2);
        assert_eq!((config.block_start, config.block_end), (10, 12));

        let bad = serde_json::json!({ "block_start": -1 });
        assert!(SuppressConfig::from_json(&bad).is_err());
    }
}
