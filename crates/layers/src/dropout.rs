//! Channel-wise dropout for `(batch, channels, height, width)` feature maps.

use candle_core::{bail, DType, Result, Tensor};
use candle_nn::ModuleT;

use crate::checks;

/// Zeroes entire channels with probability `p` while training.
///
/// Surviving channels are rescaled by `1 / (1 - p)` so evaluation needs no
/// correction; in eval mode the layer is the identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout2d {
    p: f32,
}

impl Dropout2d {
    pub fn new(p: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            bail!("dropout probability must be in [0, 1), got {p}");
        }
        Ok(Self { p })
    }
}

impl ModuleT for Dropout2d {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        if !train || self.p == 0.0 {
            return Ok(xs.clone());
        }
        let (batch, channels, _, _) = checks::expect_feature_map("dropout2d.input", xs)?;
        let keep = 1.0 - self.p as f64;
        let draw = Tensor::rand(0f32, 1f32, (batch, channels, 1, 1), xs.device())?;
        let mask = (draw.ge(self.p as f64)?.to_dtype(DType::F32)? / keep)?;
        xs.broadcast_mul(&mask.to_dtype(xs.dtype())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn eval_mode_is_identity() -> Result<()> {
        let x = Tensor::randn(0f32, 1.0, (2, 3, 4, 4), &Device::Cpu)?;
        let y = Dropout2d::new(0.5)?.forward_t(&x, false)?;
        let diff = (x - y)?.abs()?.flatten_all()?.max(0)?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn training_drops_whole_channels() -> Result<()> {
        let x = Tensor::ones((4, 16, 3, 3), DType::F32, &Device::Cpu)?;
        let y = Dropout2d::new(0.5)?.forward_t(&x, true)?;
        for n in 0..4 {
            for c in 0..16 {
                let plane = y.get(n)?.get(c)?.flatten_all()?.to_vec1::<f32>()?;
                let first = plane[0];
                assert!(first == 0.0 || (first - 2.0).abs() < 1e-6);
                assert!(plane.iter().all(|v| *v == first));
            }
        }
        Ok(())
    }

    #[test]
    fn probability_range_is_checked() {
        assert!(Dropout2d::new(1.0).is_err());
        assert!(Dropout2d::new(-0.1).is_err());
        assert!(Dropout2d::new(0.0).is_ok());
    }
}
