// SPDX-License-Identifier: MIT OR Apache-2.0

//! Model topology and target location.
//!
//! The model-owning collaborator describes its graph once, as a
//! [`ModelTopology`]: one [`BlockLayout`] per block, listing which
//! pathways exist and which of their projections are interceptable.
//! [`locate`] answers lookups against that table; nothing is found by
//! walking module names at runtime.
//!
//! ```
//! use candle_boost::{BlockLayout, Component, ModelTopology, Pathway, locate};
//!
//! // 4 blocks with all three pathways, except block 2 has no self-attention.
//! let mut blocks = vec![BlockLayout::full(); 4];
//! blocks[2] = BlockLayout::full().without_pathway(Pathway::SelfAttn);
//! let topology = ModelTopology::new(blocks);
//!
//! assert!(locate(&topology, Pathway::SelfAttn, 1, Component::Query).is_ok());
//! assert!(locate(&topology, Pathway::SelfAttn, 2, Component::Query).is_err());
//! ```

use std::fmt;

use crate::error::{BoostError, Result};
use crate::target::{Component, ModelId, Pathway, TargetId};

// ---------------------------------------------------------------------------
// ComponentSet
// ---------------------------------------------------------------------------

/// Set of projections present in one attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentSet(u8);

impl ComponentSet {
    /// No projections (pathway absent).
    pub const EMPTY: Self = Self(0);
    /// All four projections.
    pub const ALL: Self = Self(0b1111);

    /// Whether `component` is in the set.
    #[must_use]
    pub const fn contains(self, component: Component) -> bool {
        self.0 & component.bit() != 0
    }

    /// The set with `component` added.
    #[must_use]
    pub const fn with(self, component: Component) -> Self {
        Self(self.0 | component.bit())
    }

    /// The set with `component` removed.
    #[must_use]
    pub const fn without(self, component: Component) -> Self {
        Self(self.0 & !component.bit())
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over members in [`Component::ALL`] order.
    pub fn iter(self) -> impl Iterator<Item = Component> {
        Component::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

// ---------------------------------------------------------------------------
// BlockLayout
// ---------------------------------------------------------------------------

/// Which pathways and projections one block exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockLayout {
    /// Projections per pathway, indexed by [`Pathway::index`].
    pathways: [ComponentSet; 3],
}

impl BlockLayout {
    /// A block with no interceptable pathways.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            pathways: [ComponentSet::EMPTY; 3],
        }
    }

    /// A block with all three pathways, each with all four projections.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            pathways: [ComponentSet::ALL; 3],
        }
    }

    /// The layout with `pathway` set to `components`.
    #[must_use]
    pub fn with_components(mut self, pathway: Pathway, components: ComponentSet) -> Self {
        if let Some(slot) = self.pathways.get_mut(pathway.index()) {
            *slot = components;
        }
        self
    }

    /// The layout with `pathway` present and all four projections.
    #[must_use]
    pub fn with_pathway(self, pathway: Pathway) -> Self {
        self.with_components(pathway, ComponentSet::ALL)
    }

    /// The layout with `pathway` absent.
    #[must_use]
    pub fn without_pathway(self, pathway: Pathway) -> Self {
        self.with_components(pathway, ComponentSet::EMPTY)
    }

    /// Projections of `pathway` in this block (empty if absent).
    #[must_use]
    pub fn components(&self, pathway: Pathway) -> ComponentSet {
        self.pathways
            .get(pathway.index())
            .copied()
            .unwrap_or(ComponentSet::EMPTY)
    }

    /// Whether `pathway` exists in this block.
    #[must_use]
    pub fn has_pathway(&self, pathway: Pathway) -> bool {
        !self.components(pathway).is_empty()
    }
}

// ---------------------------------------------------------------------------
// ModelTopology
// ---------------------------------------------------------------------------

/// Declared blocks x pathways x components of one model instance.
///
/// Each topology mints its own [`ModelId`]; target identities located
/// against it are scoped to that id. It is intentionally not `Clone`.
#[derive(Debug)]
pub struct ModelTopology {
    /// Identity of the model instance this topology describes.
    id: ModelId,
    /// One layout per block, in block order.
    blocks: Vec<BlockLayout>,
}

impl ModelTopology {
    /// Describe a model from its per-block layouts.
    #[must_use]
    pub fn new(blocks: Vec<BlockLayout>) -> Self {
        Self {
            id: ModelId::fresh(),
            blocks,
        }
    }

    /// Describe a model whose blocks all share one layout.
    #[must_use]
    pub fn uniform(num_blocks: usize, layout: BlockLayout) -> Self {
        Self::new(vec![layout; num_blocks])
    }

    /// Identity of the described model.
    #[must_use]
    pub const fn id(&self) -> ModelId {
        self.id
    }

    /// Number of blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Layout of block `index`, if it exists.
    #[must_use]
    pub fn block(&self, index: usize) -> Option<&BlockLayout> {
        self.blocks.get(index)
    }

    /// Total number of interceptable projections.
    #[must_use]
    pub fn num_targets(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|layout| Pathway::ALL.map(|p| layout.components(p).iter().count()))
            .sum()
    }
}

// ---------------------------------------------------------------------------
// BoostableModel
// ---------------------------------------------------------------------------

/// A model that can be targeted by boosts.
///
/// The only requirement is a declared topology. The model's forward pass
/// is expected to route each declared projection output through
/// [`HookRegistry::apply`](crate::HookRegistry::apply) with the matching
/// [`TargetId`].
pub trait BoostableModel {
    /// Declared topology of this instance.
    fn topology(&self) -> &ModelTopology;
}

impl BoostableModel for ModelTopology {
    fn topology(&self) -> &ModelTopology {
        self
    }
}

// ---------------------------------------------------------------------------
// TargetRef and locate
// ---------------------------------------------------------------------------

/// A located, existing projection of a specific model instance.
///
/// Only obtainable through [`locate`], so holding one means the target
/// was present in the topology when it was looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetRef {
    /// Identity of the located target.
    id: TargetId,
}

impl TargetRef {
    /// Identity of the located target.
    #[must_use]
    pub const fn id(&self) -> TargetId {
        self.id
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Locate a projection on `model`.
///
/// # Errors
///
/// Returns [`BoostError::TopologyMismatch`] if the block does not exist,
/// the block has no such pathway, or the pathway lacks the component.
pub fn locate<M: BoostableModel + ?Sized>(
    model: &M,
    pathway: Pathway,
    block: usize,
    component: Component,
) -> Result<TargetRef> {
    let topology = model.topology();
    let mismatch = |reason: String| BoostError::TopologyMismatch {
        pathway,
        block,
        component,
        reason,
    };

    let layout = topology.block(block).ok_or_else(|| {
        mismatch(format!(
            "block out of range (model has {} blocks)",
            topology.num_blocks()
        ))
    })?;
    let components = layout.components(pathway);
    if components.is_empty() {
        return Err(mismatch("block has no such pathway".into()));
    }
    if !components.contains(component) {
        return Err(mismatch("pathway has no such projection".into()));
    }

    Ok(TargetRef {
        id: TargetId::new(topology.id(), pathway, block, component),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn topology_without_self_at(block: usize, num_blocks: usize) -> ModelTopology {
        let mut blocks = vec![BlockLayout::full(); num_blocks];
        blocks[block] = BlockLayout::full().without_pathway(Pathway::SelfAttn);
        ModelTopology::new(blocks)
    }

    #[test]
    fn locate_existing_target() {
        let topology = ModelTopology::uniform(40, BlockLayout::full());
        let target = locate(&topology, Pathway::AudioCross, 12, Component::Value).unwrap();
        assert_eq!(target.id().model, topology.id());
        assert_eq!(target.id().block, 12);
        assert_eq!(
            target.to_string(),
            "blocks.12.audio_cross_attn_wrapper.audio_cross_attn.v"
        );
    }

    #[test]
    fn missing_pathway_is_mismatch() {
        let topology = topology_without_self_at(3, 8);
        let err = locate(&topology, Pathway::SelfAttn, 3, Component::Output).unwrap_err();
        assert!(matches!(
            err,
            BoostError::TopologyMismatch {
                pathway: Pathway::SelfAttn,
                block: 3,
                component: Component::Output,
                ..
            }
        ));
        // Other pathways in the same block are still present.
        assert!(locate(&topology, Pathway::TextCross, 3, Component::Output).is_ok());
    }

    #[test]
    fn missing_component_is_mismatch() {
        let layout = BlockLayout::empty().with_components(
            Pathway::AudioCross,
            ComponentSet::EMPTY.with(Component::Output),
        );
        let topology = ModelTopology::uniform(2, layout);
        assert!(locate(&topology, Pathway::AudioCross, 0, Component::Output).is_ok());
        assert!(locate(&topology, Pathway::AudioCross, 0, Component::Query).is_err());
    }

    #[test]
    fn block_out_of_range_is_mismatch() {
        let topology = ModelTopology::uniform(4, BlockLayout::full());
        assert!(matches!(
            locate(&topology, Pathway::TextCross, 4, Component::Key),
            Err(BoostError::TopologyMismatch { block: 4, .. })
        ));
    }

    #[test]
    fn component_set_ops() {
        let set = ComponentSet::ALL.without(Component::Key);
        assert!(!set.contains(Component::Key));
        assert_eq!(set.iter().count(), 3);
        assert!(ComponentSet::EMPTY.is_empty());
    }

    #[test]
    fn num_targets_counts_declared_projections() {
        let topology = topology_without_self_at(0, 3);
        assert_eq!(topology.num_targets(), 3 * 12 - 4);
    }
}
