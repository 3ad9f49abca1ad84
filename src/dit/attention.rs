// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-head attention whose four projections are boost targets.
//!
//! The same layer serves self-attention (context is the hidden state) and
//! cross-attention (context is the text or audio conditioning).

use candle_core::{DType, Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::error::Result;
use crate::hooks::HookRegistry;
use crate::target::{Component, ModelId, Pathway, TargetId};

/// Attention with `q`, `k`, `v`, `o` linear projections.
pub(super) struct DitAttention {
    /// Which pathway this layer is.
    pathway: Pathway,
    /// Query projection (from the hidden state).
    q: Linear,
    /// Key projection (from the context).
    k: Linear,
    /// Value projection (from the context).
    v: Linear,
    /// Output projection.
    o: Linear,
    /// Number of heads.
    num_heads: usize,
    /// Dimension per head.
    head_dim: usize,
    /// `1/sqrt(head_dim)`.
    scale: f64,
}

impl DitAttention {
    /// Load projection weights (`q`, `k`, `v`, `o`, with bias) from `vb`.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Model`](crate::BoostError::Model) if weight loading fails.
    #[allow(clippy::needless_pass_by_value)] // VarBuilder is candle's pass-by-value convention
    pub(super) fn load(
        pathway: Pathway,
        hidden_size: usize,
        context_dim: usize,
        num_heads: usize,
        vb: VarBuilder<'_>,
    ) -> Result<Self> {
        let q = candle_nn::linear(hidden_size, hidden_size, vb.pp("q"))?;
        let k = candle_nn::linear(context_dim, hidden_size, vb.pp("k"))?;
        let v = candle_nn::linear(context_dim, hidden_size, vb.pp("v"))?;
        let o = candle_nn::linear(hidden_size, hidden_size, vb.pp("o"))?;
        let head_dim = hidden_size / num_heads;

        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let scale = 1.0 / (head_dim as f64).sqrt();

        Ok(Self {
            pathway,
            q,
            k,
            v,
            o,
            num_heads,
            head_dim,
            scale,
        })
    }

    /// Attention forward pass.
    ///
    /// # Shapes
    /// - `x`: `[batch, seq, hidden_size]`
    /// - `context`: `[batch, ctx_seq, context_dim]`
    /// - returns: `[batch, seq, hidden_size]` (the attention output, no residual)
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Model`](crate::BoostError::Model) on tensor operation failures.
    pub(super) fn forward(
        &self,
        x: &Tensor,
        context: &Tensor,
        model: ModelId,
        block: usize,
        registry: &HookRegistry,
    ) -> Result<Tensor> {
        let (batch, seq_len, _hidden) = x.dims3()?;
        let (_, ctx_len, _ctx_dim) = context.dims3()?;
        let target = |component| TargetId::new(model, self.pathway, block, component);

        let q = project(&self.q, x, target(Component::Query), registry)?;
        let k = project(&self.k, context, target(Component::Key), registry)?;
        let v = project(&self.v, context, target(Component::Value), registry)?;

        // [batch, seq, heads, head_dim] -> [batch, heads, seq, head_dim]
        let q = q
            .reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = k
            .reshape((batch, ctx_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = v
            .reshape((batch, ctx_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        // CONTIGUOUS: transpose produces non-unit strides; matmul requires contiguous layout
        let k_t = k.contiguous()?.transpose(2, 3)?;
        let scores = (q.matmul(&k_t)? * self.scale)?;

        // PROMOTE: softmax over F16/BF16 can produce NaN; compute in F32
        let original_dtype = scores.dtype();
        let scores_f32 = if original_dtype == DType::F32 {
            scores
        } else {
            scores.to_dtype(DType::F32)?
        };
        let mut pattern = candle_nn::ops::softmax_last_dim(&scores_f32)?;
        if original_dtype != DType::F32 {
            pattern = pattern.to_dtype(original_dtype)?;
        }

        let attn_output = pattern.matmul(&v)?.transpose(1, 2)?.contiguous()?.reshape((
            batch,
            seq_len,
            self.num_heads * self.head_dim,
        ))?;

        project(&self.o, &attn_output, target(Component::Output), registry)
    }
}

/// Project `input` and route the result through the registry.
fn project(
    linear: &Linear,
    input: &Tensor,
    target: TargetId,
    registry: &HookRegistry,
) -> Result<Tensor> {
    registry.apply(&target, linear.forward(input)?)
}
