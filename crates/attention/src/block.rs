//! Non-local attention blocks for `(batch, channels, height, width)` maps.
//!
//! A block projects query, key and value maps with stacks of 1x1
//! convolutions, flattens the spatial axes, runs an [`Attention`] kernel and
//! folds the context back onto the query's spatial grid.

use candle_core::Tensor;
use candle_nn::{conv2d, Conv2d, Conv2dConfig, Module, ModuleT, VarBuilder};
use layers::{ConvBlock, ConvBlockConfig};

use crate::core::{Attention, AttentionError, Config};
use crate::reference::ExactAttention;

/// Hyper-parameters of an [`AttentionBlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttentionBlockConfig {
    pub key_in_channels: usize,
    pub query_in_channels: usize,
    /// Embedding width of the query/key projections.
    pub channels: usize,
    pub out_channels: usize,
    /// Reuse the key projection for queries.
    pub share_key_query: bool,
    /// Max-pool factor applied to keys and values after projection.
    pub key_downsample: Option<usize>,
    pub key_query_num_convs: usize,
    /// Use conv+bn+relu blocks (instead of biased convs) for query/key.
    pub key_query_norm: bool,
    pub value_out_num_convs: usize,
    pub value_out_norm: bool,
    /// Scale similarities by `channels^-0.5`.
    pub matmul_norm: bool,
    /// Project values to `channels` and add an output projection.
    pub with_out: bool,
}

impl AttentionBlockConfig {
    /// Options used by the interlaced relation passes: separate normalised
    /// query/key stacks of depth two, a single plain value conv, scaled
    /// similarities and no output projection.
    pub fn self_attention(in_channels: usize, channels: usize) -> Self {
        Self {
            key_in_channels: in_channels,
            query_in_channels: in_channels,
            channels,
            out_channels: in_channels,
            share_key_query: false,
            key_downsample: None,
            key_query_num_convs: 2,
            key_query_norm: true,
            value_out_num_convs: 1,
            value_out_norm: false,
            matmul_norm: true,
            with_out: false,
        }
    }

    fn validate(&self) -> Result<(), AttentionError> {
        let mut problems = Vec::new();
        for (name, value) in [
            ("key_in_channels", self.key_in_channels),
            ("query_in_channels", self.query_in_channels),
            ("channels", self.channels),
            ("out_channels", self.out_channels),
            ("key_query_num_convs", self.key_query_num_convs),
            ("value_out_num_convs", self.value_out_num_convs),
        ] {
            if value == 0 {
                problems.push(format!("{name} must be greater than zero"));
            }
        }
        if self.share_key_query && self.key_in_channels != self.query_in_channels {
            problems.push(format!(
                "share_key_query requires equal input channels (key={}, query={})",
                self.key_in_channels, self.query_in_channels
            ));
        }
        if let Some(0) = self.key_downsample {
            problems.push("key_downsample factor must be greater than zero".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AttentionError::config(problems.join("; ")))
        }
    }

    fn value_channels(&self) -> usize {
        if self.with_out {
            self.channels
        } else {
            self.out_channels
        }
    }
}

/// A stack of 1x1 layers, named `0`, `1`, ... under its builder prefix.
#[derive(Debug, Clone)]
enum Projection {
    Normed(Vec<ConvBlock>),
    Plain(Vec<Conv2d>),
}

impl Projection {
    fn new(
        in_channels: usize,
        channels: usize,
        num_convs: usize,
        normed: bool,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let widths = (0..num_convs).map(|idx| if idx == 0 { in_channels } else { channels });
        if normed {
            let blocks = widths
                .enumerate()
                .map(|(idx, in_c)| {
                    ConvBlock::new(in_c, channels, ConvBlockConfig::new(1), vb.pp(idx.to_string()))
                })
                .collect::<candle_core::Result<Vec<_>>>()?;
            Ok(Self::Normed(blocks))
        } else {
            let convs = widths
                .enumerate()
                .map(|(idx, in_c)| {
                    conv2d(in_c, channels, 1, Conv2dConfig::default(), vb.pp(idx.to_string()))
                })
                .collect::<candle_core::Result<Vec<_>>>()?;
            Ok(Self::Plain(convs))
        }
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();
        match self {
            Projection::Normed(blocks) => {
                for block in blocks {
                    xs = block.forward_t(&xs, train)?;
                }
            }
            Projection::Plain(convs) => {
                for conv in convs {
                    xs = conv.forward(&xs)?;
                }
            }
        }
        Ok(xs)
    }
}

/// General attention (non-local) block over feature maps.
#[derive(Debug, Clone)]
pub struct AttentionBlock {
    config: AttentionBlockConfig,
    key_project: Projection,
    query_project: Option<Projection>,
    value_project: Projection,
    out_project: Option<Projection>,
    kernel: ExactAttention,
    kernel_config: Config,
}

impl AttentionBlock {
    pub fn new(config: AttentionBlockConfig, vb: VarBuilder) -> Result<Self, AttentionError> {
        config.validate()?;
        let key_project = Projection::new(
            config.key_in_channels,
            config.channels,
            config.key_query_num_convs,
            config.key_query_norm,
            vb.pp("key_project"),
        )?;
        let query_project = if config.share_key_query {
            None
        } else {
            Some(Projection::new(
                config.query_in_channels,
                config.channels,
                config.key_query_num_convs,
                config.key_query_norm,
                vb.pp("query_project"),
            )?)
        };
        let value_project = Projection::new(
            config.key_in_channels,
            config.value_channels(),
            config.value_out_num_convs,
            config.value_out_norm,
            vb.pp("value_project"),
        )?;
        let out_project = if config.with_out {
            Some(Projection::new(
                config.channels,
                config.out_channels,
                config.value_out_num_convs,
                config.value_out_norm,
                vb.pp("out_project"),
            )?)
        } else {
            None
        };
        let kernel_config = Config {
            matmul_norm: config.matmul_norm,
        };
        Ok(Self {
            config,
            key_project,
            query_project,
            value_project,
            out_project,
            kernel: ExactAttention::new(),
            kernel_config,
        })
    }

    pub fn config(&self) -> &AttentionBlockConfig {
        &self.config
    }

    /// Attends from every query position to every (possibly pooled) key position.
    ///
    /// Returns `(batch, out_channels, query_height, query_width)`.
    pub fn attend(
        &self,
        query_feats: &Tensor,
        key_feats: &Tensor,
        train: bool,
    ) -> Result<Tensor, AttentionError> {
        let (batch, q_channels, q_h, q_w) = query_feats
            .dims4()
            .map_err(|_| AttentionError::shape("query features must be (batch, channels, h, w)"))?;
        let (k_batch, k_channels, k_h, k_w) = key_feats
            .dims4()
            .map_err(|_| AttentionError::shape("key features must be (batch, channels, h, w)"))?;
        if k_batch != batch {
            return Err(AttentionError::shape(format!(
                "query batch {batch} does not match key batch {k_batch}"
            )));
        }
        if q_channels != self.config.query_in_channels || k_channels != self.config.key_in_channels
        {
            return Err(AttentionError::shape(format!(
                "expected query/key channels {}/{}, got {q_channels}/{k_channels}",
                self.config.query_in_channels, self.config.key_in_channels
            )));
        }

        let query_project = self.query_project.as_ref().unwrap_or(&self.key_project);
        let query = flatten_positions(&query_project.forward_t(query_feats, train)?)?;

        let mut key = self.key_project.forward_t(key_feats, train)?;
        let mut value = self.value_project.forward_t(key_feats, train)?;
        if let Some(factor) = self.config.key_downsample {
            if k_h < factor || k_w < factor {
                return Err(AttentionError::shape(format!(
                    "key extent ({k_h}, {k_w}) is smaller than the downsample factor {factor}"
                )));
            }
            key = key.max_pool2d(factor)?;
            value = value.max_pool2d(factor)?;
        }
        let key = flatten_positions(&key)?;
        let value = flatten_positions(&value)?;

        let context = self
            .kernel
            .attend(&query, &key, &value, &self.kernel_config)?;
        let context = context
            .transpose(1, 2)?
            .reshape((batch, self.config.value_channels(), q_h, q_w))?;

        match &self.out_project {
            Some(project) => Ok(project.forward_t(&context, train)?),
            None => Ok(context),
        }
    }
}

/// `(b, c, h, w)` -> `(b, h * w, c)`.
fn flatten_positions(xs: &Tensor) -> candle_core::Result<Tensor> {
    xs.flatten_from(2)?.transpose(1, 2)?.contiguous()
}

/// Self-attention over a single map followed by a conv-block output projection.
#[derive(Debug, Clone)]
pub struct SelfAttentionBlock {
    block: AttentionBlock,
    output_project: ConvBlock,
}

impl SelfAttentionBlock {
    /// `in_channels` is preserved; `channels` is the query/key embedding width.
    pub fn new(
        in_channels: usize,
        channels: usize,
        vb: VarBuilder,
    ) -> Result<Self, AttentionError> {
        let block = AttentionBlock::new(
            AttentionBlockConfig::self_attention(in_channels, channels),
            vb.clone(),
        )?;
        let output_project = ConvBlock::new(
            in_channels,
            in_channels,
            ConvBlockConfig::new(1),
            vb.pp("output_project"),
        )?;
        Ok(Self {
            block,
            output_project,
        })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, AttentionError> {
        let context = self.block.attend(xs, xs, train)?;
        Ok(self.output_project.forward_t(&context, train)?)
    }
}
