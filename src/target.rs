// SPDX-License-Identifier: MIT OR Apache-2.0

//! Target identities: which projection of which attention in which block.
//!
//! A [`TargetId`] is the dedup key of the [`HookRegistry`](crate::HookRegistry).
//! It is scoped by a [`ModelId`] so that hooks built against one model are
//! never looked up by another.
//!
//! # String form
//!
//! ```
//! use candle_boost::{Component, ModelId, Pathway, TargetId};
//!
//! let id = TargetId::new(ModelId::fresh(), Pathway::AudioCross, 6, Component::Value);
//! assert_eq!(id.to_string(), "blocks.6.audio_cross_attn_wrapper.audio_cross_attn.v");
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// ModelId
// ---------------------------------------------------------------------------

/// Process-unique identifier of a model instance.
///
/// Minted once per [`ModelTopology`](crate::ModelTopology); never reused
/// within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelId(u64);

/// Next id handed out by [`ModelId::fresh`].
static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

impl ModelId {
    /// Mint a new id, distinct from every id minted before in this process.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value (for logging).
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Pathway
// ---------------------------------------------------------------------------

/// One of the three attention mechanisms inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pathway {
    /// Cross-attention over audio embeddings.
    AudioCross,
    /// Cross-attention over text embeddings.
    TextCross,
    /// Self-attention over the video latent tokens.
    SelfAttn,
}

impl Pathway {
    /// All pathways, in orchestration order.
    pub const ALL: [Self; 3] = [Self::AudioCross, Self::TextCross, Self::SelfAttn];

    /// Key prefix used in the JSON configuration schema (`audio`, `text`, `self`).
    #[must_use]
    pub const fn config_key(self) -> &'static str {
        match self {
            Self::AudioCross => "audio",
            Self::TextCross => "text",
            Self::SelfAttn => "self",
        }
    }

    /// Module path of this attention inside a block, `WanVideo` layout.
    #[must_use]
    pub const fn module_path(self) -> &'static str {
        match self {
            Self::AudioCross => "audio_cross_attn_wrapper.audio_cross_attn",
            Self::TextCross => "cross_attn",
            Self::SelfAttn => "self_attn",
        }
    }

    /// Dense index in `0..3`, matching [`Pathway::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::AudioCross => 0,
            Self::TextCross => 1,
            Self::SelfAttn => 2,
        }
    }
}

impl fmt::Display for Pathway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AudioCross => write!(f, "audio cross-attention"),
            Self::TextCross => write!(f, "text cross-attention"),
            Self::SelfAttn => write!(f, "self-attention"),
        }
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// One of the four projections of an attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    /// Query projection `q`.
    Query,
    /// Key projection `k`.
    Key,
    /// Value projection `v`.
    Value,
    /// Output projection `o`.
    Output,
}

impl Component {
    /// All components, in orchestration order.
    pub const ALL: [Self; 4] = [Self::Query, Self::Key, Self::Value, Self::Output];

    /// Single-letter name used in module paths and config keys.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Query => "q",
            Self::Key => "k",
            Self::Value => "v",
            Self::Output => "o",
        }
    }

    /// Bit of this component in a [`ComponentSet`](crate::topology::ComponentSet).
    #[must_use]
    pub(crate) const fn bit(self) -> u8 {
        match self {
            Self::Query => 0b0001,
            Self::Key => 0b0010,
            Self::Value => 0b0100,
            Self::Output => 0b1000,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

// ---------------------------------------------------------------------------
// TargetId
// ---------------------------------------------------------------------------

/// Stable key for one (model, pathway, block, component) projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId {
    /// Model instance the target belongs to.
    pub model: ModelId,
    /// Attention pathway.
    pub pathway: Pathway,
    /// Block index.
    pub block: usize,
    /// Projection within the attention.
    pub component: Component,
}

impl TargetId {
    /// Build a target identity.
    #[must_use]
    pub const fn new(model: ModelId, pathway: Pathway, block: usize, component: Component) -> Self {
        Self {
            model,
            pathway,
            block,
            component,
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blocks.{}.{}.{}",
            self.block,
            self.pathway.module_path(),
            self.component
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
