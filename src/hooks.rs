// SPDX-License-Identifier: MIT OR Apache-2.0

//! Boost hooks and the registry that owns them.
//!
//! Provides [`BoostHook`] (a scalar post-multiply bound to one located
//! target), [`HookHandle`] (an installed hook plus the run it belongs to),
//! and [`HookRegistry`] (the table a forward pass consults at every
//! projection).
//!
//! The registry, not the model, owns every interception. A model's
//! forward pass calls [`HookRegistry::apply`] with the [`TargetId`] of each
//! projection it computes; when no hook is installed for that id the
//! tensor is returned unchanged, without a clone or a new buffer.
//!
//! # Lifecycle
//!
//! ```text
//! EMPTY --install / commit--> POPULATED --uninstall_all--> EMPTY
//! ```
//!
//! Every [`uninstall_all`](HookRegistry::uninstall_all) starts a new run
//! generation; handles record the generation they were installed in.

use std::collections::HashMap;

use candle_core::{Module, Tensor};

use crate::error::{BoostError, Result};
use crate::target::TargetId;
use crate::topology::TargetRef;

// ---------------------------------------------------------------------------
// BoostHook
// ---------------------------------------------------------------------------

/// Multiplies a target's output by a fixed scalar.
///
/// `forward(x)` is `factor * x`: same shape, same dtype, a fresh output
/// buffer, and an ordinary node in candle's autograd graph. The hook never
/// reads or writes model weights.
///
/// ```
/// use candle_boost::{BlockLayout, BoostHook, Component, ModelTopology, Pathway, locate};
/// use candle_core::{Device, Tensor};
///
/// let topology = ModelTopology::uniform(1, BlockLayout::full());
/// let target = locate(&topology, Pathway::AudioCross, 0, Component::Value).unwrap();
/// let hook = BoostHook::new(target, 2.0);
///
/// let x = Tensor::new(&[1.0f32, -2.0, 3.0], &Device::Cpu).unwrap();
/// let y = hook.forward(&x).unwrap();
/// assert_eq!(y.to_vec1::<f32>().unwrap(), vec![2.0, -4.0, 6.0]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoostHook {
    /// Located projection this hook intercepts.
    target: TargetRef,
    /// Scalar applied to the projection output.
    factor: f64,
}

impl BoostHook {
    /// Bind `factor` to a located target.
    #[must_use]
    pub const fn new(target: TargetRef, factor: f64) -> Self {
        Self { target, factor }
    }

    /// The intercepted target.
    #[must_use]
    pub const fn target(&self) -> TargetRef {
        self.target
    }

    /// The scalar factor.
    #[must_use]
    pub const fn factor(&self) -> f64 {
        self.factor
    }

    /// Scale `x` by the factor.
    ///
    /// # Shapes
    /// - `x`: any shape
    /// - returns: same shape and dtype as `x`
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Model`] if the tensor operation fails.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(Module::forward(self, x)?)
    }
}

impl Module for BoostHook {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs * self.factor
    }
}

// ---------------------------------------------------------------------------
// HookHandle
// ---------------------------------------------------------------------------

/// An installed [`BoostHook`].
///
/// Removing the handle from its registry is the complete reversal of the
/// interception: the model was never modified, so nothing else needs undoing.
#[derive(Debug, Clone, PartialEq)]
pub struct HookHandle {
    /// The installed hook.
    hook: BoostHook,
    /// Registry generation the hook was installed in.
    generation: u64,
}

impl HookHandle {
    /// The installed hook.
    #[must_use]
    pub const fn hook(&self) -> &BoostHook {
        &self.hook
    }

    /// Identity of the intercepted target.
    #[must_use]
    pub const fn target(&self) -> TargetId {
        self.hook.target().id()
    }

    /// The scalar factor.
    #[must_use]
    pub const fn factor(&self) -> f64 {
        self.hook.factor()
    }

    /// Registry generation the hook was installed in.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

// ---------------------------------------------------------------------------
// HookRegistry
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`HookRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryState {
    /// Fresh, or just torn down.
    #[default]
    Empty,
    /// A run has installed its hooks (possibly zero of them).
    Populated,
}

/// Result of [`HookRegistry::install`].
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum InstallOutcome {
    /// No hook was active for the target.
    Installed,
    /// A stale hook was active for the target and has been replaced.
    Replaced {
        /// The displaced handle.
        previous: HookHandle,
    },
}

impl InstallOutcome {
    /// Whether the install displaced an existing handle.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Replaced { .. })
    }
}

/// Table of installed hooks, keyed by [`TargetId`].
///
/// At most one handle per target is active at any time, so a target's
/// output is never multiplied by two factors in the same forward pass.
///
/// Not internally synchronized: callers must not mutate the registry while
/// a forward pass that reads it is in flight. Hosts that cannot guarantee
/// serialized stages should wrap it in a `Mutex`.
#[derive(Debug, Default)]
pub struct HookRegistry {
    /// Active handles.
    hooks: HashMap<TargetId, HookHandle>,
    /// Current lifecycle state.
    state: RegistryState,
    /// Run generation, bumped by every teardown.
    generation: u64,
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `hook`, stamping it with the current generation.
    ///
    /// The registry mints the [`HookHandle`] itself, so every handle it
    /// holds carries this registry's generation.
    ///
    /// If a handle is already active for the same target, it is replaced
    /// and a warning is logged. The orchestration protocol never does this;
    /// replacing keeps the one-factor-per-target guarantee when a caller does.
    pub fn install(&mut self, hook: BoostHook) -> InstallOutcome {
        let id = hook.target().id();
        let handle = HookHandle {
            hook,
            generation: self.generation,
        };
        self.state = RegistryState::Populated;

        match self.hooks.insert(id, handle) {
            None => {
                tracing::debug!(hook = %id, factor = hook.factor(), "boost hook installed");
                InstallOutcome::Installed
            }
            Some(previous) => {
                let conflict = BoostError::RegistryConflict(format!(
                    "{id} already boosted by {}x (generation {})",
                    previous.factor(),
                    previous.generation()
                ));
                tracing::warn!(
                    hook = %id,
                    replacement = hook.factor(),
                    "{conflict}; replacing stale handle"
                );
                InstallOutcome::Replaced { previous }
            }
        }
    }

    /// Remove the hook for `id`. No-op if none is installed.
    pub fn uninstall(&mut self, id: &TargetId) -> Option<HookHandle> {
        let removed = self.hooks.remove(id);
        if removed.is_some() {
            tracing::debug!(hook = %id, "boost hook removed");
        }
        removed
    }

    /// Remove every hook and start a new generation. Safe on an empty registry.
    ///
    /// Returns the number of hooks removed.
    pub fn uninstall_all(&mut self) -> usize {
        let removed = self.hooks.len();
        self.hooks.clear();
        self.state = RegistryState::Empty;
        self.generation += 1;
        tracing::debug!(removed, generation = self.generation, "boost registry cleared");
        removed
    }

    /// Mark the current run as complete, even if it installed nothing.
    pub(crate) fn commit(&mut self) {
        self.state = RegistryState::Populated;
    }

    /// Route a projection output through its hook, if any.
    ///
    /// This is the call a forward pass makes at every declared projection.
    ///
    /// # Shapes
    /// - `x`: any shape
    /// - returns: same shape and dtype as `x`
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Model`] if the hook's tensor operation fails.
    pub fn apply(&self, id: &TargetId, x: Tensor) -> Result<Tensor> {
        match self.hooks.get(id) {
            Some(handle) => handle.hook().forward(&x),
            None => Ok(x),
        }
    }

    /// Active handle for `id`.
    #[must_use]
    pub fn get(&self, id: &TargetId) -> Option<&HookHandle> {
        self.hooks.get(id)
    }

    /// Active factor for `id`.
    #[must_use]
    pub fn factor_at(&self, id: &TargetId) -> Option<f64> {
        self.hooks.get(id).map(HookHandle::factor)
    }

    /// Whether `id` has an active hook.
    #[must_use]
    pub fn is_installed(&self, id: &TargetId) -> bool {
        self.hooks.contains_key(id)
    }

    /// Number of active hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hook is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RegistryState {
        self.state
    }

    /// Current run generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Active handles, sorted by target.
    #[must_use]
    pub fn handles(&self) -> Vec<&HookHandle> {
        let mut handles: Vec<&HookHandle> = self.hooks.values().collect();
        handles.sort_by_key(|handle| handle.target());
        handles
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::panic
)]
mod tests {
    use candle_core::{DType, Device, Var};

    use super::*;
    use crate::target::{Component, Pathway};
    use crate::topology::{BlockLayout, ModelTopology, locate};

    fn target(topology: &ModelTopology, block: usize, component: Component) -> TargetRef {
        locate(topology, Pathway::TextCross, block, component).unwrap()
    }

    #[test]
    fn hook_multiplies_elementwise_preserving_shape() {
        let topology = ModelTopology::uniform(2, BlockLayout::full());
        let hook = BoostHook::new(target(&topology, 0, Component::Query), 3.0);

        let x = Tensor::arange(0f32, 24.0, &Device::Cpu)
            .unwrap()
            .reshape((2, 3, 4))
            .unwrap();
        let y = hook.forward(&x).unwrap();

        assert_eq!(y.dims(), x.dims());
        assert_eq!(y.dtype(), DType::F32);
        let xs: Vec<f32> = x.flatten_all().unwrap().to_vec1().unwrap();
        let ys: Vec<f32> = y.flatten_all().unwrap().to_vec1().unwrap();
        for (a, b) in xs.iter().zip(&ys) {
            assert_eq!(*b, a * 3.0);
        }
    }

    #[test]
    fn hook_preserves_half_precision_dtypes() {
        let topology = ModelTopology::uniform(1, BlockLayout::full());
        let hook = BoostHook::new(target(&topology, 0, Component::Value), 2.5);

        for dtype in [DType::F16, DType::BF16] {
            let x = Tensor::new(&[1.0f32, 2.0, -4.0], &Device::Cpu)
                .unwrap()
                .to_dtype(dtype)
                .unwrap();
            let y = hook.forward(&x).unwrap();
            assert_eq!(y.dtype(), dtype);
            let values: Vec<f32> = y.to_dtype(DType::F32).unwrap().to_vec1().unwrap();
            assert_eq!(values, vec![2.5, 5.0, -10.0]);
        }
    }

    #[test]
    fn hook_is_differentiable() {
        let topology = ModelTopology::uniform(1, BlockLayout::full());
        let hook = BoostHook::new(target(&topology, 0, Component::Output), 4.0);

        let var = Var::new(&[1.0f32, 2.0, 3.0], &Device::Cpu).unwrap();
        let y = hook.forward(var.as_tensor()).unwrap();
        let grads = y.sum_all().unwrap().backward().unwrap();
        let grad: Vec<f32> = grads.get(var.as_tensor()).unwrap().to_vec1().unwrap();
        assert_eq!(grad, vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn install_and_apply() {
        let topology = ModelTopology::uniform(2, BlockLayout::full());
        let boosted = target(&topology, 1, Component::Key);
        let untouched = target(&topology, 0, Component::Key);

        let mut registry = HookRegistry::new();
        assert_eq!(registry.state(), RegistryState::Empty);
        assert!(!registry.install(BoostHook::new(boosted, 2.0)).is_conflict());
        assert_eq!(registry.state(), RegistryState::Populated);

        let x = Tensor::ones(4, DType::F32, &Device::Cpu).unwrap();
        let y: Vec<f32> = registry
            .apply(&boosted.id(), x.clone())
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(y, vec![2.0; 4]);
        let z: Vec<f32> = registry.apply(&untouched.id(), x).unwrap().to_vec1().unwrap();
        assert_eq!(z, vec![1.0; 4]);
    }

    #[test]
    fn double_install_replaces_instead_of_stacking() {
        let topology = ModelTopology::uniform(1, BlockLayout::full());
        let t = target(&topology, 0, Component::Value);

        let mut registry = HookRegistry::new();
        let _ = registry.install(BoostHook::new(t, 2.0));
        let outcome = registry.install(BoostHook::new(t, 3.0));

        match outcome {
            InstallOutcome::Replaced { previous } => assert_eq!(previous.factor(), 2.0),
            InstallOutcome::Installed => panic!("expected a conflict"),
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.factor_at(&t.id()), Some(3.0));

        let x = Tensor::ones(2, DType::F32, &Device::Cpu).unwrap();
        let y: Vec<f32> = registry.apply(&t.id(), x).unwrap().to_vec1().unwrap();
        assert_eq!(y, vec![3.0, 3.0]);
    }

    #[test]
    fn uninstall_is_idempotent() {
        let topology = ModelTopology::uniform(1, BlockLayout::full());
        let t = target(&topology, 0, Component::Query);

        let mut registry = HookRegistry::new();
        let _ = registry.install(BoostHook::new(t, 0.5));
        assert!(registry.uninstall(&t.id()).is_some());
        assert!(registry.uninstall(&t.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn uninstall_all_is_idempotent_and_bumps_generation() {
        let topology = ModelTopology::uniform(3, BlockLayout::full());
        let mut registry = HookRegistry::new();
        assert_eq!(registry.uninstall_all(), 0);
        let first_generation = registry.generation();

        for block in 0..3 {
            let _ = registry.install(BoostHook::new(target(&topology, block, Component::Output), 1.5));
        }
        assert!(
            registry
                .handles()
                .iter()
                .all(|h| h.generation() == first_generation)
        );

        assert_eq!(registry.uninstall_all(), 3);
        assert_eq!(registry.uninstall_all(), 0);
        assert_eq!(registry.state(), RegistryState::Empty);
        assert_eq!(registry.generation(), first_generation + 2);
    }

    #[test]
    fn handles_are_sorted_by_target() {
        let topology = ModelTopology::uniform(4, BlockLayout::full());
        let mut registry = HookRegistry::new();
        for block in [3, 0, 2] {
            let _ = registry.install(BoostHook::new(target(&topology, block, Component::Key), 2.0));
        }
        let blocks: Vec<usize> = registry.handles().iter().map(|h| h.target().block).collect();
        assert_eq!(blocks, vec![0, 2, 3]);
    }
}
