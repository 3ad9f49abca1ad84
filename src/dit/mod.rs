// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference diffusion-transformer attention stack.
//!
//! A minimal stand-in for a `WanVideo`-style talking-head backbone: blocks of
//! residual self-attention, text cross-attention and audio cross-attention,
//! with weight names following the `WanVideo` layout
//! (`blocks.{i}.self_attn.q`, `blocks.{i}.cross_attn.k`,
//! `blocks.{i}.audio_cross_attn_wrapper.audio_cross_attn.v`, ...).
//!
//! Normalization, modulation and feed-forward layers are omitted; only the
//! attention projections the boost layer targets are modeled.

mod attention;
mod config;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::error::Result;
use crate::hooks::HookRegistry;
use crate::target::Pathway;
use crate::topology::{BlockLayout, BoostableModel, ModelTopology};

pub use self::config::DitConfig;

use self::attention::DitAttention;

// ---------------------------------------------------------------------------
// DitBlock
// ---------------------------------------------------------------------------

/// Attention layers of one block.
struct DitBlock {
    /// Self-attention, if this block has one.
    self_attention: Option<DitAttention>,
    /// Text cross-attention.
    text: DitAttention,
    /// Audio cross-attention, if this block has one.
    audio: Option<DitAttention>,
}

impl DitBlock {
    /// Load one block's attention layers.
    #[allow(clippy::needless_pass_by_value)] // VarBuilder is candle's pass-by-value convention
    fn load(config: &DitConfig, index: usize, vb: VarBuilder<'_>) -> Result<Self> {
        let hidden = config.hidden_size;
        let heads = config.num_heads;

        let self_attention = if config.has_self_attn(index) {
            Some(DitAttention::load(
                Pathway::SelfAttn,
                hidden,
                hidden,
                heads,
                vb.pp(Pathway::SelfAttn.module_path()),
            )?)
        } else {
            None
        };
        let text = DitAttention::load(
            Pathway::TextCross,
            hidden,
            config.text_dim,
            heads,
            vb.pp(Pathway::TextCross.module_path()),
        )?;
        let audio = if config.has_audio(index) {
            Some(DitAttention::load(
                Pathway::AudioCross,
                hidden,
                config.audio_dim,
                heads,
                vb.pp(Pathway::AudioCross.module_path()),
            )?)
        } else {
            None
        };

        Ok(Self {
            self_attention,
            text,
            audio,
        })
    }

    /// Interceptable layout of this block.
    fn layout(&self) -> BlockLayout {
        let mut layout = BlockLayout::empty().with_pathway(Pathway::TextCross);
        if self.self_attention.is_some() {
            layout = layout.with_pathway(Pathway::SelfAttn);
        }
        if self.audio.is_some() {
            layout = layout.with_pathway(Pathway::AudioCross);
        }
        layout
    }
}

// ---------------------------------------------------------------------------
// DitAttentionModel
// ---------------------------------------------------------------------------

/// Stack of [`DitConfig::num_blocks`] attention blocks.
///
/// Every projection output of the forward pass goes through
/// [`HookRegistry::apply`]; with an empty registry the forward pass is the
/// plain, unboosted computation.
pub struct DitAttentionModel {
    /// Blocks in order.
    blocks: Vec<DitBlock>,
    /// Declared topology; matches `blocks` exactly.
    topology: ModelTopology,
    /// Model configuration.
    config: DitConfig,
}

impl DitAttentionModel {
    /// Load the model from a [`VarBuilder`].
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Configuration`](crate::BoostError::Configuration)
    /// if `config` fails [`DitConfig::validate`], or
    /// [`BoostError::Model`](crate::BoostError::Model) if weight loading fails.
    #[allow(clippy::needless_pass_by_value)] // VarBuilder is candle's pass-by-value convention
    pub fn load(config: &DitConfig, vb: VarBuilder<'_>) -> Result<Self> {
        config.validate()?;

        let mut blocks = Vec::with_capacity(config.num_blocks);
        for i in 0..config.num_blocks {
            blocks.push(DitBlock::load(config, i, vb.pp(format!("blocks.{i}")))?);
        }
        let topology = ModelTopology::new(blocks.iter().map(DitBlock::layout).collect());

        tracing::info!(
            model = %topology.id(),
            num_blocks = config.num_blocks,
            hidden_size = config.hidden_size,
            num_targets = topology.num_targets(),
            "loaded DiT attention stack"
        );

        Ok(Self {
            blocks,
            topology,
            config: config.clone(),
        })
    }

    /// Model configuration.
    #[must_use]
    pub const fn config(&self) -> &DitConfig {
        &self.config
    }

    /// Run every block.
    ///
    /// Per block: `x += self_attn(x, x)`, `x += cross_attn(x, text)`,
    /// `x += audio_cross_attn(x, audio)`, skipping absent layers.
    ///
    /// # Shapes
    /// - `x`: `[batch, seq, hidden_size]`
    /// - `text`: `[batch, text_seq, text_dim]`
    /// - `audio`: `[batch, audio_seq, audio_dim]`
    /// - returns: `[batch, seq, hidden_size]`
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Model`](crate::BoostError::Model) on shape
    /// mismatches or tensor operation failures.
    pub fn forward(
        &self,
        x: &Tensor,
        text: &Tensor,
        audio: &Tensor,
        registry: &HookRegistry,
    ) -> Result<Tensor> {
        let model = self.topology.id();
        let mut hidden = x.clone();
        for (index, block) in self.blocks.iter().enumerate() {
            if let Some(self_attn) = &block.self_attention {
                let delta = self_attn.forward(&hidden, &hidden, model, index, registry)?;
                hidden = (hidden + delta)?;
            }
            let delta = block.text.forward(&hidden, text, model, index, registry)?;
            hidden = (hidden + delta)?;
            if let Some(audio_attn) = &block.audio {
                let delta = audio_attn.forward(&hidden, audio, model, index, registry)?;
                hidden = (hidden + delta)?;
            }
        }
        Ok(hidden)
    }
}

impl BoostableModel for DitAttentionModel {
    fn topology(&self) -> &ModelTopology {
        &self.topology
    }
}
