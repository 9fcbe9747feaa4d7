//! Reference CPU/GPU-friendly attention kernel.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait.

use std::sync::OnceLock;

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;
use layers::dtypes::PrecisionPolicy;

use crate::core::{Attention, AttentionError, Config};

/// Numerically stable, portable scaled dot-product attention.
#[derive(Debug, Default)]
pub struct ExactAttention {
    first_call: OnceLock<()>,
}

impl ExactAttention {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clone for ExactAttention {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::shape(
                "q, k, v must reside on the same device",
            ));
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::shape("q, k, v must share the same dtype"));
        }
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (batch, _, dim) = q
            .dims3()
            .map_err(|_| AttentionError::shape("q must have shape [batch, q_len, dim]"))?;
        let (kb, k_len, kd) = k
            .dims3()
            .map_err(|_| AttentionError::shape("k must have shape [batch, k_len, dim]"))?;
        let (vb, vk, value_dim) = v
            .dims3()
            .map_err(|_| AttentionError::shape("v must have shape [batch, k_len, value_dim]"))?;

        if kb != batch || kd != dim {
            return Err(AttentionError::shape(format!(
                "k shape mismatch: expected [{batch}, ?, {dim}] got [{kb}, {k_len}, {kd}]"
            )));
        }
        if vb != batch || vk != k_len {
            return Err(AttentionError::shape(format!(
                "v shape mismatch: expected [{batch}, {k_len}, ?] got [{vb}, {vk}, {value_dim}]"
            )));
        }
        if dim == 0 || k_len == 0 {
            return Err(AttentionError::shape(
                "attention needs at least one key position and one channel",
            ));
        }

        if self.first_call.set(()).is_ok() {
            log::debug!(
                "attention::reference init device={:?} dtype={:?} matmul_norm={}",
                device.location(),
                dtype,
                config.matmul_norm
            );
        }

        let policy = PrecisionPolicy::from_parameter_dtype(dtype);
        let q_work = policy.cast_for_matmul(q)?;
        let k_t = policy.cast_for_matmul(k)?.transpose(1, 2)?.contiguous()?;
        let v_work = policy.cast_for_matmul(v)?;

        let mut scores = q_work.contiguous()?.matmul(&k_t)?;
        if config.matmul_norm {
            scores = (scores * (1.0 / (dim as f64).sqrt()))?;
        }
        let probs = softmax_last_dim(&policy.cast_for_reduction(&scores)?)?;
        let probs = policy.cast_for_matmul(&probs)?;

        let output = probs.matmul(&v_work.contiguous()?)?;
        Ok(policy.cast_to_storage(&output)?)
    }
}
