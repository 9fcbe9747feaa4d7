//! Building blocks for segmentation heads.
//!
//! The crate hosts the convolution block (convolution, batch norm, ReLU),
//! channel dropout, bilinear resizing and the small validation helpers shared
//! by the attention and model crates. Feature maps follow the
//! `(batch, channels, height, width)` convention throughout.

pub mod checks;
pub mod conv;
pub mod dropout;
pub mod dtypes;
pub mod resize;

pub use conv::{ConvBlock, ConvBlockConfig};
pub use dropout::Dropout2d;
pub use resize::{resize_bilinear, AlignMode, Interpolation};
