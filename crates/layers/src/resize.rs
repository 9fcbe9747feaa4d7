//! Bilinear resizing of `(batch, channels, height, width)` feature maps.
//!
//! The sampling grid follows the conventions of the framework the segmentation
//! weights were trained with:
//!
//! * `align_corners = true`: the corner pixels of input and output coincide,
//!   `src = dst * (in - 1) / (out - 1)`.
//! * `align_corners = false`, [`AlignMode::HalfPixel`]:
//!   `src = max((dst + 0.5) * in / out - 0.5, 0)`.
//! * `align_corners = false`, [`AlignMode::Asymmetric`]:
//!   `src = dst * in / out`.
//!
//! Interpolation is separable: rows are blended first, then columns. Each
//! pass gathers the two neighbouring source lines with `index_select` and
//! mixes them with broadcast weights, so the op runs on any Candle device.

use candle_core::{bail, DType, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Sampling-grid convention used when `align_corners` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignMode {
    /// Pixel centres are aligned (`align_mode = 0`).
    HalfPixel,
    /// Top-left corners are aligned (`align_mode = 1`).
    #[default]
    Asymmetric,
}

/// Interpolation options for [`resize_bilinear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interpolation {
    pub align_corners: bool,
    pub align_mode: AlignMode,
}

impl Interpolation {
    pub fn new(align_corners: bool) -> Self {
        Self {
            align_corners,
            align_mode: AlignMode::default(),
        }
    }
}

/// Source indices and blend weight for one output line.
#[derive(Debug, Clone, PartialEq)]
struct AxisSamples {
    lower: Vec<u32>,
    upper: Vec<u32>,
    weight: Vec<f32>,
}

fn axis_samples(in_len: usize, out_len: usize, mode: Interpolation) -> AxisSamples {
    let ratio = if mode.align_corners {
        if out_len > 1 {
            (in_len as f32 - 1.0) / (out_len as f32 - 1.0)
        } else {
            0.0
        }
    } else {
        in_len as f32 / out_len as f32
    };
    let half_pixel = !mode.align_corners && mode.align_mode == AlignMode::HalfPixel;

    let mut lower = Vec::with_capacity(out_len);
    let mut upper = Vec::with_capacity(out_len);
    let mut weight = Vec::with_capacity(out_len);
    for dst in 0..out_len {
        let src = if half_pixel {
            (ratio * (dst as f32 + 0.5) - 0.5).max(0.0)
        } else {
            ratio * dst as f32
        };
        let i0 = (src as usize).min(in_len - 1);
        let i1 = if i0 + 1 < in_len { i0 + 1 } else { i0 };
        lower.push(i0 as u32);
        upper.push(i1 as u32);
        weight.push(src - i0 as f32);
    }
    AxisSamples {
        lower,
        upper,
        weight,
    }
}

fn blend_axis(xs: &Tensor, dim: usize, samples: &AxisSamples) -> Result<Tensor> {
    let device = xs.device();
    let out_len = samples.weight.len();
    let lower = Tensor::from_slice(&samples.lower, out_len, device)?;
    let upper = Tensor::from_slice(&samples.upper, out_len, device)?;

    let mut weight_shape = [1usize; 4];
    weight_shape[dim] = out_len;
    let upper_w = Tensor::from_slice(&samples.weight, out_len, device)?
        .to_dtype(xs.dtype())?
        .reshape(weight_shape.to_vec())?;
    let lower_w = upper_w.affine(-1.0, 1.0)?;

    let a = xs.index_select(&lower, dim)?.broadcast_mul(&lower_w)?;
    let b = xs.index_select(&upper, dim)?.broadcast_mul(&upper_w)?;
    a + b
}

/// Resizes `xs` to `(out_h, out_w)` with bilinear interpolation.
pub fn resize_bilinear(
    xs: &Tensor,
    (out_h, out_w): (usize, usize),
    mode: Interpolation,
) -> Result<Tensor> {
    let (_, _, in_h, in_w) = checks::expect_feature_map("resize.input", xs)?;
    if out_h == 0 || out_w == 0 {
        bail!("resize target must be non-empty, got ({out_h}, {out_w})");
    }
    if in_h == 0 || in_w == 0 {
        bail!("cannot resize an empty feature map of extent ({in_h}, {in_w})");
    }
    if (in_h, in_w) == (out_h, out_w) {
        return Ok(xs.clone());
    }
    checks::expect_dtype_in(
        "resize.input",
        xs,
        &[DType::F16, DType::BF16, DType::F32, DType::F64],
    )?;

    let policy = PrecisionPolicy::from_parameter_dtype(xs.dtype());
    let mut out = policy.cast_for_matmul(xs)?;
    if in_h != out_h {
        out = blend_axis(&out, 2, &axis_samples(in_h, out_h, mode))?;
    }
    if in_w != out_w {
        out = blend_axis(&out, 3, &axis_samples(in_w, out_w, mode))?;
    }
    policy.cast_to_storage(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn ramp() -> Result<Tensor> {
        // value(y, x) = 2 * y + x
        Tensor::new(&[0f32, 1., 2., 3.], &Device::Cpu)?.reshape((1, 1, 2, 2))
    }

    fn expected_plane(rows: &[f32], cols: &[f32]) -> Vec<Vec<f32>> {
        rows.iter()
            .map(|r| cols.iter().map(|c| 2.0 * r + c).collect())
            .collect()
    }

    fn assert_close(actual: Vec<Vec<f32>>, expected: Vec<Vec<f32>>) {
        for (row_a, row_e) in actual.iter().zip(expected.iter()) {
            for (a, e) in row_a.iter().zip(row_e.iter()) {
                assert!((a - e).abs() < 1e-5, "got {actual:?}, expected {expected:?}");
            }
        }
    }

    #[test]
    fn asymmetric_grid_repeats_the_last_line() -> Result<()> {
        let out = resize_bilinear(&ramp()?, (4, 4), Interpolation::new(false))?;
        let plane = out.squeeze(0)?.squeeze(0)?.to_vec2::<f32>()?;
        let axis = [0.0, 0.5, 1.0, 1.0];
        assert_close(plane, expected_plane(&axis, &axis));
        Ok(())
    }

    #[test]
    fn aligned_corners_hit_both_ends() -> Result<()> {
        let out = resize_bilinear(&ramp()?, (4, 4), Interpolation::new(true))?;
        let plane = out.squeeze(0)?.squeeze(0)?.to_vec2::<f32>()?;
        let axis = [0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0];
        assert_close(plane, expected_plane(&axis, &axis));
        Ok(())
    }

    #[test]
    fn half_pixel_grid_matches_centre_alignment() -> Result<()> {
        let mode = Interpolation {
            align_corners: false,
            align_mode: AlignMode::HalfPixel,
        };
        let out = resize_bilinear(&ramp()?, (4, 4), mode)?;
        let plane = out.squeeze(0)?.squeeze(0)?.to_vec2::<f32>()?;
        let axis = [0.0, 0.25, 0.75, 1.0];
        assert_close(plane, expected_plane(&axis, &axis));
        Ok(())
    }

    #[test]
    fn downsampling_and_non_square_targets() -> Result<()> {
        let xs = Tensor::arange(0f32, 16f32, &Device::Cpu)?.reshape((1, 1, 4, 4))?;
        let out = resize_bilinear(&xs, (2, 3), Interpolation::new(false))?;
        assert_eq!(out.dims(), &[1, 1, 2, 3]);
        // rows sample 0 and 2, columns sample 0, 4/3 and 8/3
        let plane = out.squeeze(0)?.squeeze(0)?.to_vec2::<f32>()?;
        let cols = [0.0, 4.0 / 3.0, 8.0 / 3.0];
        let expected = [0.0f32, 2.0]
            .iter()
            .map(|r| cols.iter().map(|c| 4.0 * r + c).collect())
            .collect();
        assert_close(plane, expected);
        Ok(())
    }

    #[test]
    fn same_size_is_identity_and_keeps_dtype() -> Result<()> {
        let xs = Tensor::randn(0f32, 1.0, (2, 3, 5, 5), &Device::Cpu)?.to_dtype(DType::BF16)?;
        let same = resize_bilinear(&xs, (5, 5), Interpolation::new(true))?;
        assert_eq!(same.dtype(), DType::BF16);
        let up = resize_bilinear(&xs, (9, 7), Interpolation::new(false))?;
        assert_eq!(up.dims(), &[2, 3, 9, 7]);
        assert_eq!(up.dtype(), DType::BF16);
        Ok(())
    }

    #[test]
    fn single_pixel_target_samples_origin() {
        let samples = axis_samples(
            5,
            1,
            Interpolation {
                align_corners: true,
                align_mode: AlignMode::Asymmetric,
            },
        );
        assert_eq!(samples.lower, vec![0]);
        assert_eq!(samples.weight, vec![0.0]);
    }
}
