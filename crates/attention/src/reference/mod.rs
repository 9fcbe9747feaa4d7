//! Portable, exact attention kernels.
//!
//! These paths favour clarity over absolute performance and materialise the
//! full `[q_len, k_len]` similarity matrix per batch entry.

pub mod exact;

pub use exact::ExactAttention;
