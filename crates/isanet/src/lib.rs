//! Semantic segmentation with interlaced sparse self-attention.
//!
//! [`IsaNet`] couples a [`Backbone`] with an [`IsaHead`]: the high-stage
//! feature map is related across groups and within groups on interlaced
//! layouts ([`interlace`]), fused and classified, and the scores are resized
//! to the input resolution.

pub mod backbone;
pub mod config;
pub mod error;
pub mod head;
pub mod interlace;
pub mod model;
pub mod weights;

pub use backbone::{Backbone, PlainConvBackbone};
pub use config::{BackboneConfig, IsaNetConfig};
pub use error::{Result, SegmentationError};
pub use head::{IsaHead, IsaHeadConfig};
pub use interlace::{GroupFactor, Padding, PartitionGrid};
pub use model::{build, IsaNet};
pub use weights::{load_pretrained, save_weights, LoadPolicy, LoadReport};
