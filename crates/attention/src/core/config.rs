//! Configuration options shared by all attention implementations.

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Scale similarities by `1 / sqrt(dim)` before the softmax.
    pub matmul_norm: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { matmul_norm: true }
    }
}
