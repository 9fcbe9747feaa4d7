use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use layers::{resize_bilinear, AlignMode, Interpolation};

use crate::backbone::{Backbone, PlainConvBackbone};
use crate::config::IsaNetConfig;
use crate::error::{Result, SegmentationError};
use crate::head::{IsaHead, IsaHeadConfig};
use crate::weights;

/// Backbone plus interlaced sparse self-attention head.
///
/// Score maps are upsampled back to the input resolution; the primary map
/// comes first, followed by the auxiliary map when that branch is enabled.
pub struct IsaNet {
    config: IsaNetConfig,
    backbone: Box<dyn Backbone>,
    head: IsaHead,
    interpolation: Interpolation,
}

impl IsaNet {
    /// Validates `config` against the backbone's published stages, then
    /// allocates the head under `vb.pp("head")`.
    pub fn new(config: IsaNetConfig, backbone: Box<dyn Backbone>, vb: VarBuilder) -> Result<Self> {
        let in_channels = config.validate_against(backbone.feat_channels())?;
        let head_config = IsaHeadConfig {
            num_classes: config.num_classes,
            in_channels,
            isa_channels: config.isa_channels,
            group_factor: config.group_factor()?,
            enable_auxiliary_branch: config.enable_auxiliary_branch,
            aux_channels: config.aux_channels,
            dropout_p: config.dropout_p,
        };
        let head = IsaHead::new(head_config, vb.pp("head"))?;
        let interpolation = Interpolation {
            align_corners: config.align_corners,
            align_mode: AlignMode::Asymmetric,
        };
        log::info!(
            "built isanet num_classes={} stages={:?} channels={:?} aux={}",
            config.num_classes,
            config.backbone_indices,
            in_channels,
            config.enable_auxiliary_branch
        );
        Ok(Self {
            config,
            backbone,
            head,
            interpolation,
        })
    }

    pub fn config(&self) -> &IsaNetConfig {
        &self.config
    }

    pub fn head(&self) -> &IsaHead {
        &self.head
    }

    pub fn backbone(&self) -> &dyn Backbone {
        self.backbone.as_ref()
    }

    pub fn forward_t(&self, image: &Tensor, train: bool) -> Result<Vec<Tensor>> {
        let (_, _, height, width) = image.dims4().map_err(|_| {
            SegmentationError::shape(format!(
                "expected a (batch, channels, height, width) image, got {:?}",
                image.dims()
            ))
        })?;
        let features = self.backbone.forward_t(image, train)?;
        let selected = self
            .config
            .backbone_indices
            .iter()
            .map(|&index| {
                features.get(index).cloned().ok_or_else(|| {
                    SegmentationError::shape(format!(
                        "backbone returned {} feature maps, stage {index} was requested",
                        features.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.head
            .forward_t(&selected, train)?
            .iter()
            .map(|logits| {
                resize_bilinear(logits, (height, width), self.interpolation)
                    .map_err(SegmentationError::from)
            })
            .collect()
    }

    /// Evaluation-mode forward pass.
    pub fn infer(&self, image: &Tensor) -> Result<Vec<Tensor>> {
        self.forward_t(image, false)
    }

    /// Per-pixel labels `(N, H, W)` from the primary scores.
    pub fn predict(&self, image: &Tensor) -> Result<Tensor> {
        let logits = self.infer(image)?;
        let primary = logits
            .first()
            .ok_or_else(|| SegmentationError::shape("model produced no score maps"))?;
        Ok(primary.argmax(1)?.to_dtype(DType::U32)?)
    }
}

/// Builds the plain backbone and model on `device` from a fresh [`VarMap`],
/// loading `config.pretrained` when set.
pub fn build(config: &IsaNetConfig, device: &Device) -> Result<(IsaNet, VarMap)> {
    config.validate()?;
    config.validate_against(&config.backbone.feat_channels)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let backbone = PlainConvBackbone::new(&config.backbone, vb.pp("backbone"))?;
    let model = IsaNet::new(config.clone(), Box::new(backbone), vb)?;
    if let Some(path) = &config.pretrained {
        weights::load_pretrained(&varmap, path, config.load_policy)?;
    }
    Ok((model, varmap))
}
