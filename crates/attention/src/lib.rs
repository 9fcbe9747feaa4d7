//! Scaled dot-product attention over flattened feature maps.
//!
//! The [`Attention`] trait is the portable kernel API: it consumes query, key
//! and value tensors laid out as `[batch, positions, channels]` and returns a
//! context tensor `[batch, query_positions, value_channels]`. Query and key
//! position counts may differ. Reductions are carried out in `f32` and the
//! output matches the query dtype.
//!
//! [`AttentionBlock`] wraps a kernel with learned 1x1 projections so it can be
//! applied directly to `(batch, channels, height, width)` feature maps, and
//! [`SelfAttentionBlock`] specialises it to the case where queries and keys
//! come from the same map.

pub mod block;
pub mod core;
pub mod reference;

pub use block::{AttentionBlock, AttentionBlockConfig, SelfAttentionBlock};
pub use core::{Attention, AttentionError, Config};
pub use reference::ExactAttention;
