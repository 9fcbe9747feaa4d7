//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Validates the `(batch, channels, height, width)` layout and returns its dims.
pub fn expect_feature_map(label: &str, tensor: &Tensor) -> Result<(usize, usize, usize, usize)> {
    tensor.dims4().map_err(|_| {
        Error::Msg(format!(
            "{label}: expected (batch, channels, height, width) layout, got {:?}",
            tensor.dims()
        ))
    })
}

/// Validates a feature map with a known channel count.
pub fn expect_channels(label: &str, tensor: &Tensor, channels: usize) -> Result<()> {
    let (_, actual, _, _) = expect_feature_map(label, tensor)?;
    if actual == channels {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected {channels} channels, got {actual}"
        )))
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.iter().copied().any(|allowed| allowed == dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {:?}, got {:?}",
            allowed, dtype
        )))
    }
}
