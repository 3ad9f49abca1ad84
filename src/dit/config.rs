// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shape configuration for the reference diffusion transformer.

use serde_json::Value;

use crate::config::{get_usize_or, lookup, wrong_type};
use crate::error::{BoostError, Result};

/// Dimensions and per-block pathway presence of a [`DitAttentionModel`](super::DitAttentionModel).
///
/// Text cross-attention exists in every block. Self-attention and audio
/// cross-attention exist in every block unless restricted by
/// [`self_attn_blocks`](Self::self_attn_blocks) /
/// [`audio_blocks`](Self::audio_blocks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DitConfig {
    /// Number of transformer blocks.
    pub num_blocks: usize,
    /// Hidden (query) dimension.
    pub hidden_size: usize,
    /// Number of attention heads.
    pub num_heads: usize,
    /// Dimension of text conditioning tokens.
    pub text_dim: usize,
    /// Dimension of audio conditioning tokens.
    pub audio_dim: usize,
    /// Blocks that carry self-attention; `None` means every block.
    pub self_attn_blocks: Option<Vec<usize>>,
    /// Blocks that carry audio cross-attention; `None` means every block.
    pub audio_blocks: Option<Vec<usize>>,
}

impl DitConfig {
    /// A config with every pathway in every block, conditioning at `hidden_size`.
    #[must_use]
    pub const fn new(num_blocks: usize, hidden_size: usize, num_heads: usize) -> Self {
        Self {
            num_blocks,
            hidden_size,
            num_heads,
            text_dim: hidden_size,
            audio_dim: hidden_size,
            self_attn_blocks: None,
            audio_blocks: None,
        }
    }

    /// Per-head dimension.
    #[must_use]
    pub const fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    /// Whether `block` carries self-attention.
    #[must_use]
    pub fn has_self_attn(&self, block: usize) -> bool {
        self.self_attn_blocks
            .as_ref()
            .is_none_or(|blocks| blocks.contains(&block))
    }

    /// Whether `block` carries audio cross-attention.
    #[must_use]
    pub fn has_audio(&self, block: usize) -> bool {
        self.audio_blocks
            .as_ref()
            .is_none_or(|blocks| blocks.contains(&block))
    }

    /// Check dimensions and block lists.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Configuration`] on a zero dimension, a hidden
    /// size not divisible by the head count, or a listed block index past
    /// `num_blocks`.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("num_blocks", self.num_blocks),
            ("hidden_size", self.hidden_size),
            ("num_heads", self.num_heads),
            ("text_dim", self.text_dim),
            ("audio_dim", self.audio_dim),
        ] {
            if value == 0 {
                return Err(BoostError::Configuration(format!("{name} must be > 0")));
            }
        }
        if self.hidden_size % self.num_heads != 0 {
            return Err(BoostError::Configuration(format!(
                "hidden_size {} is not divisible by num_heads {}",
                self.hidden_size, self.num_heads
            )));
        }
        for (name, list) in [
            ("self_attn_blocks", &self.self_attn_blocks),
            ("audio_blocks", &self.audio_blocks),
        ] {
            if let Some(&block) = list.iter().flatten().find(|&&b| b >= self.num_blocks) {
                return Err(BoostError::Configuration(format!(
                    "{name} lists block {block}, model has {} blocks",
                    self.num_blocks
                )));
            }
        }
        Ok(())
    }

    /// Parse from a JSON object.
    ///
    /// `num_blocks`, `hidden_size` and `num_heads` are required;
    /// `text_dim` and `audio_dim` default to `hidden_size`.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Configuration`] on a missing required field, a
    /// wrong type, or a config that fails [`validate`](Self::validate).
    pub fn from_json(config: &Value) -> Result<Self> {
        let hidden_size = get_required_usize(config, "hidden_size")?;
        let parsed = Self {
            num_blocks: get_required_usize(config, "num_blocks")?,
            hidden_size,
            num_heads: get_required_usize(config, "num_heads")?,
            text_dim: get_usize_or(config, "text_dim", hidden_size)?,
            audio_dim: get_usize_or(config, "audio_dim", hidden_size)?,
            self_attn_blocks: get_block_list(config, "self_attn_blocks")?,
            audio_blocks: get_block_list(config, "audio_blocks")?,
        };
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Extract a required `usize` field.
fn get_required_usize(config: &Value, key: &str) -> Result<usize> {
    if lookup(config, key).is_none() {
        return Err(BoostError::Configuration(format!(
            "missing required field '{key}'"
        )));
    }
    get_usize_or(config, key, 0)
}

/// Extract an optional array of block indices.
fn get_block_list(config: &Value, key: &str) -> Result<Option<Vec<usize>>> {
    let Some(value) = lookup(config, key) else {
        return Ok(None);
    };
    let items = value
        .as_array()
        .ok_or_else(|| wrong_type(key, "an array of block indices", value))?;
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| wrong_type(key, "an array of block indices", value))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}
