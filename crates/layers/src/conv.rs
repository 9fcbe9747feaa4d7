//! Convolution block: 2-D convolution, batch normalisation and ReLU.
//!
//! Inputs are `(batch, in_channels, height, width)`. Odd kernels use "same"
//! padding, so a stride of one preserves the spatial extent and a stride of
//! `s` yields `ceil(extent / s)`.

use candle_core::{bail, Result, Tensor};
use candle_nn::{
    batch_norm, conv2d, conv2d_no_bias, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Module,
    ModuleT, VarBuilder,
};

use crate::checks;

/// Static configuration of a [`ConvBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvBlockConfig {
    pub kernel_size: usize,
    pub stride: usize,
    pub dilation: usize,
    /// Whether the convolution carries its own bias (the norm already has one).
    pub bias: bool,
}

impl ConvBlockConfig {
    /// Stride-one, undilated, bias-free block with the given kernel.
    pub fn new(kernel_size: usize) -> Self {
        Self {
            kernel_size,
            stride: 1,
            dilation: 1,
            bias: false,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    fn padding(&self) -> usize {
        self.dilation * (self.kernel_size - 1) / 2
    }

    fn validate(&self) -> Result<()> {
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            bail!(
                "conv block kernel size must be a positive odd number, got {}",
                self.kernel_size
            );
        }
        if self.stride == 0 {
            bail!("conv block stride must be greater than zero");
        }
        if self.dilation == 0 {
            bail!("conv block dilation must be greater than zero");
        }
        Ok(())
    }
}

/// Conv + BatchNorm + ReLU, the workhorse of the decoder head and backbone.
#[derive(Debug, Clone)]
pub struct ConvBlock {
    conv: Conv2d,
    norm: BatchNorm,
    in_channels: usize,
}

impl ConvBlock {
    /// Allocates parameters under `vb` as `conv.*` and `bn.*`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        config: ConvBlockConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        if in_channels == 0 || out_channels == 0 {
            bail!(
                "conv block channels must be non-zero (in={in_channels}, out={out_channels})"
            );
        }
        let conv_cfg = Conv2dConfig {
            padding: config.padding(),
            stride: config.stride,
            dilation: config.dilation,
            ..Default::default()
        };
        let conv = if config.bias {
            conv2d(in_channels, out_channels, config.kernel_size, conv_cfg, vb.pp("conv"))?
        } else {
            conv2d_no_bias(in_channels, out_channels, config.kernel_size, conv_cfg, vb.pp("conv"))?
        };
        let norm = batch_norm(
            out_channels,
            BatchNormConfig {
                eps: 1e-5,
                ..Default::default()
            },
            vb.pp("bn"),
        )?;
        Ok(Self {
            conv,
            norm,
            in_channels,
        })
    }
}

impl ModuleT for ConvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        checks::expect_channels("conv_block.input", xs, self.in_channels)?;
        let xs = self.conv.forward(xs)?;
        let xs = self.norm.forward_t(&xs, train)?;
        xs.relu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn builder(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    #[test]
    fn same_padding_preserves_extent() -> Result<()> {
        let varmap = VarMap::new();
        let block = ConvBlock::new(4, 6, ConvBlockConfig::new(3), builder(&varmap))?;
        let x = Tensor::randn(0f32, 1.0, (2, 4, 9, 7), &Device::Cpu)?;
        let y = block.forward_t(&x, false)?;
        assert_eq!(y.dims(), &[2, 6, 9, 7]);
        let min = y.flatten_all()?.min(0)?.to_vec0::<f32>()?;
        assert!(min >= 0.0);
        Ok(())
    }

    #[test]
    fn strided_block_rounds_up() -> Result<()> {
        let varmap = VarMap::new();
        let cfg = ConvBlockConfig::new(3).with_stride(2);
        let block = ConvBlock::new(3, 8, cfg, builder(&varmap))?;
        let x = Tensor::zeros((1, 3, 13, 8), DType::F32, &Device::Cpu)?;
        let y = block.forward_t(&x, false)?;
        assert_eq!(y.dims(), &[1, 8, 7, 4]);
        Ok(())
    }

    #[test]
    fn parameters_are_named_after_submodules() -> Result<()> {
        let varmap = VarMap::new();
        ConvBlock::new(2, 3, ConvBlockConfig::new(1).with_bias(true), builder(&varmap).pp("proj"))?;
        let data = varmap.data().lock().unwrap();
        for name in ["proj.conv.weight", "proj.conv.bias", "proj.bn.weight", "proj.bn.bias"] {
            assert!(data.contains_key(name), "missing {name}");
        }
        assert_eq!(data["proj.conv.weight"].dims(), &[3, 2, 1, 1]);
        Ok(())
    }

    #[test]
    fn even_kernels_and_wrong_channels_are_rejected() -> Result<()> {
        let varmap = VarMap::new();
        assert!(ConvBlock::new(2, 3, ConvBlockConfig::new(2), builder(&varmap)).is_err());

        let block = ConvBlock::new(2, 3, ConvBlockConfig::new(1), builder(&varmap))?;
        let x = Tensor::zeros((1, 5, 2, 2), DType::F32, &Device::Cpu)?;
        assert!(block.forward_t(&x, false).is_err());
        Ok(())
    }
}
