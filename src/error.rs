// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for candle-boost.

use crate::target::{Component, Pathway};

/// Errors that can occur while resolving, locating, or installing boosts.
///
/// The variants differ in how far they propagate:
///
/// - [`Configuration`](Self::Configuration) aborts a whole
///   [`apply`](crate::apply) call.
/// - [`TopologyMismatch`](Self::TopologyMismatch) is caught per target and
///   recorded as a skip in the [`BoostReport`](crate::BoostReport).
/// - [`RegistryConflict`](Self::RegistryConflict) is only ever logged; the
///   registry replaces the stale handle instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum BoostError {
    /// Invalid user input: unparsable range text, inverted bounds,
    /// out-of-range block indices, unknown presets, non-finite factors.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested (pathway, block, component) does not exist on this model.
    #[error("topology mismatch: {pathway} {component} at block {block}: {reason}")]
    TopologyMismatch {
        /// Requested pathway.
        pathway: Pathway,
        /// Requested block index.
        block: usize,
        /// Requested component.
        component: Component,
        /// Why the lookup failed.
        reason: String,
    },

    /// An install targeted an identity that already had an active hook.
    #[error("registry conflict: {0}")]
    RegistryConflict(String),

    /// Tensor operation failure inside a hook or a forward pass (wraps candle).
    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),
}

/// Result type alias for candle-boost operations.
pub type Result<T> = std::result::Result<T, BoostError>;
