use attention::AttentionError;
use thiserror::Error;

/// Failures raised while building or running the segmentation network.
#[derive(Debug, Error)]
pub enum SegmentationError {
    /// Invalid hyper-parameters, detected at construction.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Tensors (usually backbone outputs) do not have the expected layout.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Pretrained weights are unreadable or incompatible with the model.
    #[error("failed to load weights: {0}")]
    WeightLoad(String),
    #[error(transparent)]
    Attention(#[from] AttentionError),
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

impl SegmentationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::ShapeMismatch(message.into())
    }

    pub fn weights(message: impl Into<String>) -> Self {
        Self::WeightLoad(message.into())
    }
}

pub type Result<T, E = SegmentationError> = std::result::Result<T, E>;
