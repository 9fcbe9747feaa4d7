//! Interlaced spatial decomposition of feature maps.
//!
//! A map of extent `(H, W)` is padded to `(Qh * Ph, Qw * Pw)` and every pixel
//! is addressed as `(qh * Ph + ph, qw * Pw + pw)`. Two layouts are derived
//! from that addressing:
//!
//! * the **global** layout `(N * Ph * Pw, C, Qh, Qw)` gathers, for one
//!   intra-group offset `(ph, pw)`, the pixel at that offset in every group,
//!   so attention over it relates distant positions;
//! * the **local** layout `(N * Qh * Qw, C, Ph, Pw)` gathers the `Ph x Pw`
//!   contiguous block of one group, so attention over it relates neighbours.
//!
//! [`PartitionGrid::recompose`] and [`PartitionGrid::crop`] invert the chain
//! exactly; with identity relation passes the pipeline is the identity.

use candle_core::Tensor;

use crate::error::{Result, SegmentationError};

/// Partition factor `(Ph, Pw)`; both entries are at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupFactor {
    height: usize,
    width: usize,
}

impl GroupFactor {
    pub fn new(height: usize, width: usize) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(SegmentationError::configuration(format!(
                "group factor entries must be positive, got ({height}, {width})"
            )));
        }
        Ok(Self { height, width })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

/// Zero border added around a map so it tiles exactly into groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding {
    /// Splits the deficits as `floor(d / 2)` before and the rest after.
    pub fn split(pad_h: usize, pad_w: usize) -> Self {
        Self {
            top: pad_h / 2,
            bottom: pad_h - pad_h / 2,
            left: pad_w / 2,
            right: pad_w - pad_w / 2,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Group counts and padding derived from a [`GroupFactor`] and a map extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionGrid {
    factor: GroupFactor,
    height: usize,
    width: usize,
    groups_h: usize,
    groups_w: usize,
    padding: Padding,
}

impl PartitionGrid {
    pub fn new(factor: GroupFactor, height: usize, width: usize) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(SegmentationError::shape(format!(
                "cannot partition an empty map of extent ({height}, {width})"
            )));
        }
        let groups_h = height.div_ceil(factor.height);
        let groups_w = width.div_ceil(factor.width);
        let padding = Padding::split(
            groups_h * factor.height - height,
            groups_w * factor.width - width,
        );
        Ok(Self {
            factor,
            height,
            width,
            groups_h,
            groups_w,
            padding,
        })
    }

    /// Grid for the spatial extent of a `(N, C, H, W)` map.
    pub fn for_map(factor: GroupFactor, xs: &Tensor) -> Result<Self> {
        let (_, _, height, width) = dims4("interlace input", xs)?;
        Self::new(factor, height, width)
    }

    /// `(Qh, Qw)`.
    pub fn groups(&self) -> (usize, usize) {
        (self.groups_h, self.groups_w)
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    pub fn padded_extent(&self) -> (usize, usize) {
        (
            self.groups_h * self.factor.height,
            self.groups_w * self.factor.width,
        )
    }

    /// Zero-pads `(N, C, H, W)` to `(N, C, Qh * Ph, Qw * Pw)`.
    pub fn pad(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = dims4("pad input", xs)?;
        self.expect_extent("pad input", (h, w), (self.height, self.width))?;
        if self.padding.is_zero() {
            return Ok(xs.clone());
        }
        let Padding {
            top,
            bottom,
            left,
            right,
        } = self.padding;
        Ok(xs.pad_with_zeros(2, top, bottom)?.pad_with_zeros(3, left, right)?)
    }

    /// `(N, C, Qh * Ph, Qw * Pw)` -> `(N * Ph * Pw, C, Qh, Qw)`.
    pub fn to_global(&self, xs: &Tensor) -> Result<Tensor> {
        let (n, c, h, w) = dims4("global layout input", xs)?;
        self.expect_extent("global layout input", (h, w), self.padded_extent())?;
        let (qh, qw) = self.groups();
        let (ph, pw) = (self.factor.height, self.factor.width);
        Ok(xs
            .reshape(vec![n, c, qh, ph, qw, pw])?
            .permute((0, 3, 5, 1, 2, 4))?
            .reshape((n * ph * pw, c, qh, qw))?)
    }

    /// `(N * Ph * Pw, C, Qh, Qw)` -> `(N * Qh * Qw, C, Ph, Pw)`.
    pub fn global_to_local(&self, xs: &Tensor) -> Result<Tensor> {
        let (rows, c, h, w) = dims4("local layout input", xs)?;
        let (qh, qw) = self.groups();
        let (ph, pw) = (self.factor.height, self.factor.width);
        self.expect_extent("local layout input", (h, w), (qh, qw))?;
        let n = split_batch("local layout input", rows, ph * pw)?;
        Ok(xs
            .reshape(vec![n, ph, pw, c, qh, qw])?
            .permute((0, 4, 5, 3, 1, 2))?
            .reshape((n * qh * qw, c, ph, pw))?)
    }

    /// `(N * Qh * Qw, C, Ph, Pw)` -> `(N, C, Qh * Ph, Qw * Pw)`.
    pub fn recompose(&self, xs: &Tensor) -> Result<Tensor> {
        let (rows, c, h, w) = dims4("recompose input", xs)?;
        let (qh, qw) = self.groups();
        let (ph, pw) = (self.factor.height, self.factor.width);
        self.expect_extent("recompose input", (h, w), (ph, pw))?;
        let n = split_batch("recompose input", rows, qh * qw)?;
        Ok(xs
            .reshape(vec![n, qh, qw, c, ph, pw])?
            .permute((0, 3, 1, 4, 2, 5))?
            .reshape((n, c, qh * ph, qw * pw))?)
    }

    /// Removes the padding added by [`PartitionGrid::pad`].
    pub fn crop(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = dims4("crop input", xs)?;
        self.expect_extent("crop input", (h, w), self.padded_extent())?;
        if self.padding.is_zero() {
            return Ok(xs.clone());
        }
        Ok(xs
            .narrow(2, self.padding.top, self.height)?
            .narrow(3, self.padding.left, self.width)?)
    }

    fn expect_extent(
        &self,
        label: &str,
        actual: (usize, usize),
        expected: (usize, usize),
    ) -> Result<()> {
        if actual == expected {
            Ok(())
        } else {
            Err(SegmentationError::shape(format!(
                "{label}: expected spatial extent {expected:?}, got {actual:?}"
            )))
        }
    }
}

/// Runs the full interlaced decomposition around two relation passes.
///
/// `global` sees the `(N * Ph * Pw, C, Qh, Qw)` layout and `local` the
/// `(N * Qh * Qw, C, Ph, Pw)` layout; each must preserve its input shape.
pub fn interlace<G, L>(xs: &Tensor, factor: GroupFactor, global: G, local: L) -> Result<Tensor>
where
    G: FnOnce(&Tensor) -> Result<Tensor>,
    L: FnOnce(&Tensor) -> Result<Tensor>,
{
    let grid = PartitionGrid::for_map(factor, xs)?;
    log::debug!(
        "interlace extent=({}, {}) groups={:?} padding={:?}",
        grid.height,
        grid.width,
        grid.groups(),
        grid.padding()
    );
    let feat = grid.to_global(&grid.pad(xs)?)?;
    let feat = global(&feat)?;
    let feat = grid.global_to_local(&feat)?;
    let feat = local(&feat)?;
    grid.crop(&grid.recompose(&feat)?)
}

fn dims4(label: &str, xs: &Tensor) -> Result<(usize, usize, usize, usize)> {
    xs.dims4().map_err(|_| {
        SegmentationError::shape(format!(
            "{label}: expected (batch, channels, height, width), got {:?}",
            xs.dims()
        ))
    })
}

fn split_batch(label: &str, rows: usize, per_item: usize) -> Result<usize> {
    if rows % per_item != 0 {
        return Err(SegmentationError::shape(format!(
            "{label}: leading dimension {rows} is not a multiple of {per_item}"
        )));
    }
    Ok(rows / per_item)
}
