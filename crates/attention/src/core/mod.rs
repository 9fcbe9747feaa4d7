//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on tensors with layout `[batch, positions,
//! channels]`. Reductions should accumulate in `f32` regardless of the
//! incoming dtype (`bf16`, `f16`, or `f32`).

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::Config;
pub use errors::AttentionError;

/// Unified interface for attention kernels.
///
/// * `q` is `[batch, q_len, dim]`, `k` is `[batch, k_len, dim]` and `v` is
///   `[batch, k_len, value_dim]`.
/// * The returned tensor is `[batch, q_len, value_dim]` in the dtype of `q`.
/// * Softmax is taken over the key axis.
pub trait Attention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        config: &Config,
    ) -> Result<Tensor, AttentionError>;
}
