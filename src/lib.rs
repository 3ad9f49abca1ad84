// SPDX-License-Identifier: MIT OR Apache-2.0

//! # candle-boost
//!
//! Runtime attention boosting for diffusion transformers, built on
//! [candle](https://github.com/huggingface/candle).
//!
//! A boost multiplies the output of one attention projection (query, key,
//! value or output) of one pathway (audio cross-attention, text
//! cross-attention or self-attention) in one block by a scalar. Boosts are
//! installed as hooks in a [`HookRegistry`] that the model's forward pass
//! consults at every projection; the model weights are never touched.
//!
//! Each [`apply`] first tears down every hook from the previous run, so
//! boosts never stack across runs and a factor of `1.0` everywhere leaves
//! the model exactly as loaded.
//!
//! ```
//! use candle_boost::{BlockLayout, BoostConfig, HookRegistry, ModelTopology, apply, teardown};
//!
//! let model = ModelTopology::uniform(40, BlockLayout::full());
//! let mut registry = HookRegistry::new();
//!
//! let config = BoostConfig::from_json(&serde_json::json!({
//!     "audio_v_boost": 2.5,
//!     "audio_block_range": "early_0-10_body",
//! }))
//! .unwrap();
//! let (_model, report) = apply(&model, &config, &mut registry).unwrap();
//! assert_eq!(report.installed, 11);
//!
//! assert_eq!(teardown(&mut registry), 11);
//! ```
//!
//! ## Modules
//!
//! - [`target`]: pathway / component / target identities
//! - [`range`]: block presets and range resolution
//! - [`topology`]: model topology and target location
//! - [`hooks`]: the scaling hook and the registry
//! - [`config`]: boost and suppression configuration
//! - [`orchestrator`]: teardown-then-install entry points
//! - [`dit`]: a reference diffusion-transformer attention stack

#![warn(missing_docs)]

pub mod config;
pub mod dit;
pub mod error;
pub mod hooks;
pub mod orchestrator;
pub mod range;
pub mod target;
pub mod topology;

// --- Public re-exports ---------------------------------------------------

// Errors
pub use error::{BoostError, Result};

// Targets
pub use target::{Component, ModelId, Pathway, TargetId};

// Block ranges
pub use range::{BlockPreset, BlockRange, BlockRangeSpec, CUSTOM_SELECTION, resolve};

// Topology
pub use topology::{BlockLayout, BoostableModel, ComponentSet, ModelTopology, TargetRef, locate};

// Hooks
pub use hooks::{BoostHook, HookHandle, HookRegistry, InstallOutcome, RegistryState};

// Configuration
pub use config::{
    BoostConfig, BoostMode, ComponentFactors, NEUTRAL_FACTOR, PathwayConfig, SuppressConfig,
    is_neutral,
};

// Orchestration
pub use orchestrator::{
    BoostReport, PathwayReport, SkippedTarget, apply, apply_suppression, teardown,
};

// Reference model
pub use dit::{DitAttentionModel, DitConfig};
