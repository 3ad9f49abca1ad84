// SPDX-License-Identifier: MIT OR Apache-2.0

//! Block-range presets and custom range parsing.
//!
//! A [`BlockRangeSpec`] is either a named [`BlockPreset`] or custom text.
//! [`resolve`] turns it into a [`BlockRange`]: a strictly increasing,
//! deduplicated list of block indices, each below the model's block count.
//!
//! # Boundary convention
//!
//! Both ends are **inclusive**, for presets and custom text alike:
//! `"0-10"` and `early_0-10_body` both select blocks `0, 1, ..., 10`
//! (11 blocks).
//!
//! ```
//! use candle_boost::{BlockRangeSpec, resolve};
//!
//! let spec: BlockRangeSpec = "0-5, 25-39".parse().unwrap();
//! let range = resolve(&spec, 40).unwrap();
//! assert_eq!(range.len(), 21);
//! assert_eq!(range.to_string(), "0-5,25-39");
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{BoostError, Result};

// ---------------------------------------------------------------------------
// BlockPreset
// ---------------------------------------------------------------------------

/// Named block ranges tuned for a 40-block audio-driven video `DiT`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockPreset {
    /// Blocks 0-5: coarse scene structure.
    EarlyStructure,
    /// Blocks 0-10: large body movements.
    EarlyBody,
    /// Blocks 0-20: full-body motion.
    EarlyMidFullBody,
    /// Blocks 6-24: strongest lip-sync sensitivity.
    MidLipsync,
    /// Blocks 10-25: hand and arm gestures.
    MidGestures,
    /// Blocks 25-39: fine texture.
    LateTexture,
    /// Blocks 0-30.
    MostAggressive,
    /// Blocks 0-39.
    AllMaximum,
}

impl BlockPreset {
    /// Every preset, in display order.
    pub const ALL: [Self; 8] = [
        Self::EarlyStructure,
        Self::EarlyBody,
        Self::EarlyMidFullBody,
        Self::MidLipsync,
        Self::MidGestures,
        Self::LateTexture,
        Self::MostAggressive,
        Self::AllMaximum,
    ];

    /// Canonical preset name (e.g. `"early_0-10_body"`).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EarlyStructure => "early_0-5_structure",
            Self::EarlyBody => "early_0-10_body",
            Self::EarlyMidFullBody => "early_mid_0-20_full_body",
            Self::MidLipsync => "mid_6-24_lipsync",
            Self::MidGestures => "mid_10-25_gestures",
            Self::LateTexture => "late_25-39_texture",
            Self::MostAggressive => "most_0-30_aggressive",
            Self::AllMaximum => "all_0-39_maximum",
        }
    }

    /// Inclusive `(start, end)` bounds.
    #[must_use]
    pub const fn bounds(self) -> (usize, usize) {
        match self {
            Self::EarlyStructure => (0, 5),
            Self::EarlyBody => (0, 10),
            Self::EarlyMidFullBody => (0, 20),
            Self::MidLipsync => (6, 24),
            Self::MidGestures => (10, 25),
            Self::LateTexture => (25, 39),
            Self::MostAggressive => (0, 30),
            Self::AllMaximum => (0, 39),
        }
    }

    /// Look up a preset by canonical name or short alias
    /// (`early`, `early_mid`, `mid`, `late`, `most`, `all`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "early" => return Some(Self::EarlyBody),
            "early_mid" => return Some(Self::EarlyMidFullBody),
            "mid" => return Some(Self::MidGestures),
            "late" => return Some(Self::LateTexture),
            "most" => return Some(Self::MostAggressive),
            "all" => return Some(Self::AllMaximum),
            _ => {}
        }
        Self::ALL.into_iter().find(|preset| preset.name() == name)
    }
}

impl fmt::Display for BlockPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// BlockRangeSpec
// ---------------------------------------------------------------------------

/// Selection name that defers to a separate custom range string.
pub const CUSTOM_SELECTION: &str = "custom";

/// Unresolved block-range specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRangeSpec {
    /// One of the named presets.
    Preset(BlockPreset),
    /// Custom text: comma-separated `start-end` pairs or single indices.
    Custom(String),
}

impl BlockRangeSpec {
    /// Parse a preset name or custom range text.
    ///
    /// The bare selection `"custom"` is rejected here because it carries no
    /// range; use [`from_selection`](Self::from_selection) to pair it with
    /// its custom text.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Configuration`] for `"custom"`, empty text, or
    /// a name that is neither a preset nor range-shaped.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text == CUSTOM_SELECTION {
            return Err(BoostError::Configuration(
                "block range 'custom' needs a custom range string".into(),
            ));
        }
        if let Some(preset) = BlockPreset::from_name(text) {
            return Ok(Self::Preset(preset));
        }
        if text.starts_with(|c: char| c.is_ascii_digit()) {
            return Ok(Self::Custom(text.to_owned()));
        }
        if text.is_empty() {
            return Err(BoostError::Configuration("empty block range".into()));
        }
        Err(BoostError::Configuration(format!(
            "unknown block range preset '{text}'"
        )))
    }

    /// Combine a preset selection with its companion custom range, the way
    /// a preset drop-down and a free-text field pair up in host UIs.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Configuration`] if `selection` is not
    /// `"custom"` and does not [`parse`](Self::parse).
    pub fn from_selection(selection: &str, custom_range: &str) -> Result<Self> {
        if selection.trim() == CUSTOM_SELECTION {
            return Ok(Self::Custom(custom_range.trim().to_owned()));
        }
        Self::parse(selection)
    }
}

impl FromStr for BlockRangeSpec {
    type Err = BoostError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<BlockPreset> for BlockRangeSpec {
    fn from(preset: BlockPreset) -> Self {
        Self::Preset(preset)
    }
}

impl fmt::Display for BlockRangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preset(preset) => write!(f, "{preset}"),
            Self::Custom(text) => write!(f, "{text}"),
        }
    }
}

// ---------------------------------------------------------------------------
// BlockRange
// ---------------------------------------------------------------------------

/// Resolved, strictly increasing, deduplicated block indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockRange {
    /// Sorted unique indices.
    blocks: Vec<usize>,
}

impl BlockRange {
    /// Indices as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.blocks
    }

    /// Iterate over the indices in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.blocks.iter().copied()
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no block is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether `block` is selected.
    #[must_use]
    pub fn contains(&self, block: usize) -> bool {
        self.blocks.binary_search(&block).is_ok()
    }

    /// Lowest selected index.
    #[must_use]
    pub fn first(&self) -> Option<usize> {
        self.blocks.first().copied()
    }

    /// Highest selected index.
    #[must_use]
    pub fn last(&self) -> Option<usize> {
        self.blocks.last().copied()
    }
}

/// Compact form: contiguous runs joined by commas, e.g. `0-5,25-39`.
impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut runs: Vec<(usize, usize)> = Vec::new();
        for block in self.iter() {
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == block => *end = block,
                _ => runs.push((block, block)),
            }
        }
        for (i, (start, end)) in runs.into_iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a BlockRange {
    type Item = usize;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, usize>>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter().copied()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve a specification against a model with `max_blocks` blocks.
///
/// # Errors
///
/// Returns [`BoostError::Configuration`] if custom text is unparsable,
/// a pair has `start > end`, or any index is `>= max_blocks`.
pub fn resolve(spec: &BlockRangeSpec, max_blocks: usize) -> Result<BlockRange> {
    let mut blocks = BTreeSet::new();
    match spec {
        BlockRangeSpec::Preset(preset) => {
            let (start, end) = preset.bounds();
            check_bounds(end, max_blocks, preset.name())?;
            blocks.extend(start..=end);
        }
        BlockRangeSpec::Custom(text) => {
            if text.trim().is_empty() {
                return Err(BoostError::Configuration("empty custom block range".into()));
            }
            for part in text.split(',') {
                let (start, end) = parse_part(part, text)?;
                check_bounds(end, max_blocks, text)?;
                blocks.extend(start..=end);
            }
        }
    }
    Ok(BlockRange {
        blocks: blocks.into_iter().collect(),
    })
}

/// Parse one comma-separated part: `start-end` or a single index.
fn parse_part(part: &str, text: &str) -> Result<(usize, usize)> {
    let part = part.trim();
    if part.is_empty() {
        return Err(BoostError::Configuration(format!(
            "empty entry in block range '{text}'"
        )));
    }
    let (start, end) = if let Some((start, end)) = part.split_once('-') {
        (parse_index(start, text)?, parse_index(end, text)?)
    } else {
        let index = parse_index(part, text)?;
        (index, index)
    };
    if start > end {
        return Err(BoostError::Configuration(format!(
            "invalid block range '{part}': start {start} > end {end}"
        )));
    }
    Ok((start, end))
}

/// Parse a single non-negative block index.
fn parse_index(raw: &str, text: &str) -> Result<usize> {
    raw.trim().parse::<usize>().map_err(|_| {
        BoostError::Configuration(format!(
            "invalid block index '{}' in block range '{text}'",
            raw.trim()
        ))
    })
}

/// Check the end of an ordered inclusive pair against the model's block count.
fn check_bounds(end: usize, max_blocks: usize, origin: &str) -> Result<()> {
    if end >= max_blocks {
        return Err(BoostError::Configuration(format!(
            "block range '{origin}' reaches block {end} (model has {max_blocks} blocks)"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn custom(text: &str) -> BlockRangeSpec {
        BlockRangeSpec::Custom(text.to_owned())
    }

    fn is_config_error(result: Result<BlockRange>) -> bool {
        matches!(result, Err(BoostError::Configuration(_)))
    }

    #[test]
    fn early_body_is_inclusive() {
        let range = resolve(&BlockRangeSpec::from(BlockPreset::EarlyBody), 40).unwrap();
        assert_eq!(range.len(), 11);
        assert_eq!(range.first(), Some(0));
        assert_eq!(range.last(), Some(10));
        assert_eq!(range.to_string(), "0-10");
    }

    #[test]
    fn custom_and_preset_agree() {
        let from_text = resolve(&custom("0-10"), 40).unwrap();
        let from_preset = resolve(&BlockRangeSpec::parse("early_0-10_body").unwrap(), 40).unwrap();
        assert_eq!(from_text, from_preset);
    }

    #[test]
    fn every_preset_fits_forty_blocks() {
        for preset in BlockPreset::ALL {
            let range = resolve(&BlockRangeSpec::from(preset), 40).unwrap();
            let (start, end) = preset.bounds();
            assert_eq!(range.len(), end - start + 1, "{preset}");
            assert_eq!(BlockPreset::from_name(preset.name()), Some(preset));
        }
    }

    #[test]
    fn aliases_map_to_presets() {
        assert_eq!(BlockPreset::from_name("early"), Some(BlockPreset::EarlyBody));
        assert_eq!(
            BlockPreset::from_name("early_mid"),
            Some(BlockPreset::EarlyMidFullBody)
        );
        assert_eq!(BlockPreset::from_name("all"), Some(BlockPreset::AllMaximum));
        assert_eq!(BlockPreset::from_name("nonsense"), None);
    }

    #[test]
    fn inverted_bounds_rejected() {
        assert!(is_config_error(resolve(&custom("10-5"), 40)));
    }

    #[test]
    fn out_of_range_rejected() {
        assert!(is_config_error(resolve(&custom("0-40"), 40)));
        assert!(is_config_error(resolve(&custom("40"), 40)));
        assert!(is_config_error(resolve(&BlockRangeSpec::from(BlockPreset::AllMaximum), 30)));
        assert!(is_config_error(resolve(&custom("0"), 0)));
    }

    #[test]
    fn unparsable_text_rejected() {
        for text in ["", " ", "a-b", "3-", "-3", "1,,2", "1-2-3", "1.5"] {
            assert!(is_config_error(resolve(&custom(text), 40)), "{text:?}");
        }
    }

    #[test]
    fn multi_part_is_sorted_and_deduplicated() {
        let range = resolve(&custom(" 30-32, 3 ,1-4,31"), 40).unwrap();
        assert_eq!(range.as_slice(), &[1, 2, 3, 4, 30, 31, 32]);
        assert_eq!(range.to_string(), "1-4,30-32");
        assert!(range.as_slice().windows(2).all(|w| w[0] < w[1]));
    }

    /// Strictly increasing and below `max_blocks`.
    fn assert_well_formed(range: &BlockRange, max_blocks: usize, text: &str) {
        let blocks = range.as_slice();
        assert!(!blocks.is_empty(), "{text}");
        assert!(blocks.windows(2).all(|w| w[0] < w[1]), "{text}");
        assert!(blocks.iter().all(|&b| b < max_blocks), "{text}");
    }

    #[test]
    fn every_valid_pair_resolves_well_formed() {
        let max_blocks = 12;
        for start in 0..max_blocks {
            for end in start..max_blocks {
                let text = format!("{start}-{end}");
                let range = resolve(&custom(&text), max_blocks).unwrap();
                assert_well_formed(&range, max_blocks, &text);
                assert_eq!(range.len(), end - start + 1);
                assert_eq!((range.first(), range.last()), (Some(start), Some(end)));
            }
        }
    }

    #[test]
    fn multi_part_combinations_resolve_well_formed() {
        let max_blocks = 40;
        let parts = ["0-5", "3", "25-39", "4-4", "10-20", "39", "18-30", "0"];
        for a in parts {
            for b in parts {
                for c in parts {
                    let text = format!("{a}, {b},{c}");
                    let range = resolve(&custom(&text), max_blocks).unwrap();
                    assert_well_formed(&range, max_blocks, &text);
                    // Union of the parts, nothing more.
                    let expected: BTreeSet<usize> = [a, b, c]
                        .into_iter()
                        .flat_map(|part| resolve(&custom(part), max_blocks).unwrap().blocks)
                        .collect();
                    assert_eq!(range.as_slice(), expected.into_iter().collect::<Vec<_>>());
                }
            }
        }
    }

    #[test]
    fn inverted_pair_rejected_even_when_out_of_range() {
        assert!(is_config_error(resolve(&custom("50-45"), 40)));
        assert!(is_config_error(resolve(&custom("1-2,9-8"), 40)));
    }

    #[test]
    fn huge_end_rejected_without_expanding() {
        let text = format!("0-{}", usize::MAX);
        assert!(is_config_error(resolve(&custom(&text), 40)));
    }

    #[test]
    fn parse_distinguishes_presets_and_custom() {
        assert_eq!(
            BlockRangeSpec::parse("mid_6-24_lipsync").unwrap(),
            BlockRangeSpec::Preset(BlockPreset::MidLipsync)
        );
        assert_eq!(BlockRangeSpec::parse(" 6-24 ").unwrap(), custom("6-24"));
        assert!(BlockRangeSpec::parse("custom").is_err());
        assert!(BlockRangeSpec::parse("huge").is_err());
        assert_eq!(
            BlockRangeSpec::from_selection("custom", "0-5,25-39").unwrap(),
            custom("0-5,25-39")
        );
        assert_eq!(
            BlockRangeSpec::from_selection("late", "ignored").unwrap(),
            BlockRangeSpec::Preset(BlockPreset::LateTexture)
        );
    }
}
