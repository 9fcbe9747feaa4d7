//! Interlaced sparse self-attention decoder head.
//!
//! The high-stage map is reduced to a quarter of its channels, related
//! globally (across groups) and then locally (within groups) on the
//! interlaced layouts of [`crate::interlace`], fused with its own input and
//! classified. An optional auxiliary classifier runs on the low-stage map.

use attention::SelfAttentionBlock;
use candle_core::{Tensor, D};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, Module, ModuleT, VarBuilder};
use layers::{checks, ConvBlock, ConvBlockConfig, Dropout2d};

use crate::error::{Result, SegmentationError};
use crate::interlace::{self, GroupFactor};

/// Construction parameters of an [`IsaHead`].
#[derive(Debug, Clone, PartialEq)]
pub struct IsaHeadConfig {
    pub num_classes: usize,
    /// Channels of the `[low, high]` backbone stages.
    pub in_channels: [usize; 2],
    pub isa_channels: usize,
    pub group_factor: GroupFactor,
    pub enable_auxiliary_branch: bool,
    pub aux_channels: usize,
    pub dropout_p: f32,
}

impl IsaHeadConfig {
    fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let high = self.in_channels[1];
        if high % 4 != 0 || high / 4 == 0 {
            problems.push(format!(
                "head input channels must be a positive multiple of 4, got {high}"
            ));
        }
        if self.num_classes == 0 {
            problems.push("num_classes must be greater than zero".to_string());
        }
        if self.isa_channels == 0 {
            problems.push("isa_channels must be greater than zero".to_string());
        }
        if self.enable_auxiliary_branch && (self.aux_channels == 0 || self.in_channels[0] == 0) {
            problems.push("auxiliary branch channels must be greater than zero".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            problems.push(format!("dropout_p must be in [0, 1), got {}", self.dropout_p));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(SegmentationError::Configuration(problems.join("; ")))
        }
    }
}

#[derive(Debug, Clone)]
struct Classifier {
    dropout: Dropout2d,
    conv: Conv2d,
}

impl Classifier {
    fn new(in_channels: usize, num_classes: usize, p: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            dropout: Dropout2d::new(p)?,
            conv: conv2d(in_channels, num_classes, 1, Conv2dConfig::default(), vb)?,
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.dropout.forward_t(xs, train)?;
        Ok(self.conv.forward(&xs)?)
    }
}

#[derive(Debug, Clone)]
struct AuxiliaryBranch {
    conv: ConvBlock,
    cls: Classifier,
}

/// Decoder producing the primary (and optionally auxiliary) class scores at
/// the resolution of the selected backbone stages.
#[derive(Debug, Clone)]
pub struct IsaHead {
    config: IsaHeadConfig,
    inter_channels: usize,
    in_conv: ConvBlock,
    global_relation: SelfAttentionBlock,
    local_relation: SelfAttentionBlock,
    out_conv: ConvBlock,
    cls: Classifier,
    aux: Option<AuxiliaryBranch>,
}

impl IsaHead {
    pub fn new(config: IsaHeadConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let [low_channels, high_channels] = config.in_channels;
        let inter_channels = high_channels / 4;

        let in_conv = ConvBlock::new(
            high_channels,
            inter_channels,
            ConvBlockConfig::new(3),
            vb.pp("in_conv"),
        )?;
        let global_relation =
            SelfAttentionBlock::new(inter_channels, config.isa_channels, vb.pp("global_relation"))?;
        let local_relation =
            SelfAttentionBlock::new(inter_channels, config.isa_channels, vb.pp("local_relation"))?;
        let out_conv = ConvBlock::new(
            inter_channels * 2,
            inter_channels,
            ConvBlockConfig::new(1),
            vb.pp("out_conv"),
        )?;
        let cls = Classifier::new(
            inter_channels,
            config.num_classes,
            config.dropout_p,
            vb.pp("cls"),
        )?;

        let aux = if config.enable_auxiliary_branch {
            let vb = vb.pp("aux");
            Some(AuxiliaryBranch {
                conv: ConvBlock::new(
                    low_channels,
                    config.aux_channels,
                    ConvBlockConfig::new(3),
                    vb.pp("conv"),
                )?,
                cls: Classifier::new(
                    config.aux_channels,
                    config.num_classes,
                    config.dropout_p,
                    vb.pp("cls"),
                )?,
            })
        } else {
            None
        };

        log::debug!(
            "isa head in_channels={:?} inter_channels={} isa_channels={} group_factor=({}, {}) aux={}",
            config.in_channels,
            inter_channels,
            config.isa_channels,
            config.group_factor.height(),
            config.group_factor.width(),
            aux.is_some()
        );

        Ok(Self {
            config,
            inter_channels,
            in_conv,
            global_relation,
            local_relation,
            out_conv,
            cls,
            aux,
        })
    }

    pub fn config(&self) -> &IsaHeadConfig {
        &self.config
    }

    /// Channel width of the relation passes, a quarter of the high stage.
    pub fn inter_channels(&self) -> usize {
        self.inter_channels
    }

    pub fn has_auxiliary_branch(&self) -> bool {
        self.aux.is_some()
    }

    /// Fused `(N, C / 4, H, W)` features of the high-stage map.
    pub fn forward_features(&self, high_stage: &Tensor, train: bool) -> Result<Tensor> {
        self.expect_stage("high stage", high_stage, self.config.in_channels[1])?;
        let x = self.in_conv.forward_t(high_stage, train)?;
        let related = interlace::interlace(
            &x,
            self.config.group_factor,
            |global| Ok(self.global_relation.forward_t(global, train)?),
            |local| Ok(self.local_relation.forward_t(local, train)?),
        )?;
        let fused = Tensor::cat(&[&related, &x], 1)?;
        Ok(self.out_conv.forward_t(&fused, train)?)
    }

    /// Decodes `[low_stage, high_stage]` into `[primary, auxiliary?]` scores.
    pub fn forward_t(&self, features: &[Tensor], train: bool) -> Result<Vec<Tensor>> {
        let [low_stage, high_stage] = features else {
            return Err(SegmentationError::shape(format!(
                "decoder expects exactly two feature maps, got {}",
                features.len()
            )));
        };

        let fused = self.forward_features(high_stage, train)?;
        let mut logits = vec![self.cls.forward_t(&fused, train)?];

        if let Some(aux) = &self.aux {
            self.expect_stage("low stage", low_stage, self.config.in_channels[0])?;
            let x = aux.conv.forward_t(low_stage, train)?;
            logits.push(aux.cls.forward_t(&x, train)?);
        }
        Ok(logits)
    }

    fn expect_stage(&self, label: &str, xs: &Tensor, channels: usize) -> Result<()> {
        checks::expect_feature_map(label, xs)
            .and_then(|_| checks::expect_channels(label, xs, channels))
            .map_err(|err| SegmentationError::shape(err.to_string()))?;
        if xs.dim(D::Minus1)? == 0 || xs.dim(D::Minus2)? == 0 {
            return Err(SegmentationError::shape(format!(
                "{label} has an empty spatial extent {:?}",
                xs.dims()
            )));
        }
        Ok(())
    }
}
