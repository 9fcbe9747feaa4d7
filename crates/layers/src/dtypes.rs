//! Precision policy for attention and resize arithmetic.
//!
//! Feature maps may be stored in `f16`/`bf16`, but similarity matrices,
//! softmax statistics and interpolation weights are evaluated in `f32`
//! before results are cast back to the storage dtype.

use candle_core::{DType, Result, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Policy for feature maps stored as `storage`.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let (compute, reduction) = match storage {
            DType::F16 | DType::BF16 => (DType::F32, DType::F32),
            DType::F64 => (DType::F64, DType::F64),
            other => (other, DType::F32),
        };
        Self {
            storage,
            compute,
            reduction,
        }
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    /// Dtype used for matmuls and interpolation blends.
    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.compute)
    }

    /// Casts similarity scores before softmax.
    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.reduction)
    }

    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.storage)
    }
}

fn cast(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}
