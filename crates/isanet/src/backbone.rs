//! Feature extractors feeding the decoder.

use candle_core::Tensor;
use candle_nn::{ModuleT, VarBuilder};
use layers::{ConvBlock, ConvBlockConfig};

use crate::config::BackboneConfig;
use crate::error::{Result, SegmentationError};

/// A network mapping `(N, 3, H, W)` images to a list of stage feature maps.
pub trait Backbone: Send + Sync {
    /// Channel count of every stage, in output order.
    fn feat_channels(&self) -> &[usize];

    fn forward_t(&self, image: &Tensor, train: bool) -> Result<Vec<Tensor>>;
}

/// Stem plus one strided (or dilated) conv block per stage.
#[derive(Debug, Clone)]
pub struct PlainConvBackbone {
    stem: ConvBlock,
    stages: Vec<ConvBlock>,
    feat_channels: Vec<usize>,
}

impl PlainConvBackbone {
    pub const IN_CHANNELS: usize = 3;

    pub fn new(config: &BackboneConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let stem = ConvBlock::new(
            Self::IN_CHANNELS,
            config.stem_channels,
            ConvBlockConfig::new(3).with_stride(BackboneConfig::STEM_STRIDE),
            vb.pp("stem"),
        )?;

        let mut stages = Vec::with_capacity(config.feat_channels.len());
        let mut in_channels = config.stem_channels;
        let mut dilation = 1;
        for (i, (&out_channels, stride)) in config
            .feat_channels
            .iter()
            .zip(config.stage_strides())
            .enumerate()
        {
            // Stages that stop downsampling grow their receptive field instead.
            let block = if stride == 1 {
                dilation *= 2;
                ConvBlockConfig::new(3).with_dilation(dilation)
            } else {
                ConvBlockConfig::new(3).with_stride(stride)
            };
            stages.push(ConvBlock::new(
                in_channels,
                out_channels,
                block,
                vb.pp(format!("stages.{i}")),
            )?);
            in_channels = out_channels;
        }

        Ok(Self {
            stem,
            stages,
            feat_channels: config.feat_channels.clone(),
        })
    }
}

impl Backbone for PlainConvBackbone {
    fn feat_channels(&self) -> &[usize] {
        &self.feat_channels
    }

    fn forward_t(&self, image: &Tensor, train: bool) -> Result<Vec<Tensor>> {
        let (_, channels, _, _) = image.dims4().map_err(|_| {
            SegmentationError::shape(format!(
                "backbone expects (batch, 3, height, width) images, got {:?}",
                image.dims()
            ))
        })?;
        if channels != Self::IN_CHANNELS {
            return Err(SegmentationError::shape(format!(
                "backbone expects {} input channels, got {channels}",
                Self::IN_CHANNELS
            )));
        }

        let mut xs = self.stem.forward_t(image, train)?;
        let mut outputs = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            xs = stage.forward_t(&xs, train)?;
            outputs.push(xs.clone());
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn stages_follow_output_strides() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = BackboneConfig {
            feat_channels: vec![4, 8, 12, 16],
            output_strides: vec![4, 8, 8, 8],
            stem_channels: 4,
        };
        let backbone = PlainConvBackbone::new(&config, vb)?;
        assert_eq!(backbone.feat_channels(), &[4, 8, 12, 16]);

        let image = Tensor::randn(0f32, 1.0, (1, 3, 32, 40), &device)?;
        let feats = backbone.forward_t(&image, false)?;
        let dims: Vec<_> = feats.iter().map(|f| f.dims().to_vec()).collect();
        assert_eq!(
            dims,
            vec![
                vec![1, 4, 8, 10],
                vec![1, 8, 4, 5],
                vec![1, 12, 4, 5],
                vec![1, 16, 4, 5],
            ]
        );
        Ok(())
    }

    #[test]
    fn rejects_grayscale_images() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = BackboneConfig {
            feat_channels: vec![4, 8],
            output_strides: vec![4, 8],
            stem_channels: 4,
        };
        let backbone = PlainConvBackbone::new(&config, vb)?;
        let image = Tensor::zeros((1, 1, 16, 16), DType::F32, &device)?;
        assert!(matches!(
            backbone.forward_t(&image, false),
            Err(SegmentationError::ShapeMismatch(_))
        ));
        Ok(())
    }
}
