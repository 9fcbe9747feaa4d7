use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};
use crate::interlace::GroupFactor;
use crate::weights::LoadPolicy;

/// Hyper-parameters of [`IsaNet`](crate::IsaNet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsaNetConfig {
    pub num_classes: usize,
    /// Backbone stages feeding the auxiliary branch and the ISA head.
    #[serde(default = "default_backbone_indices")]
    pub backbone_indices: [usize; 2],
    #[serde(default = "default_isa_channels")]
    pub isa_channels: usize,
    /// Partition factor `(Ph, Pw)`.
    #[serde(default = "default_group_factor")]
    pub group_factor: [usize; 2],
    #[serde(default = "default_true")]
    pub enable_auxiliary_branch: bool,
    #[serde(default)]
    pub align_corners: bool,
    #[serde(default)]
    pub pretrained: Option<PathBuf>,
    #[serde(default)]
    pub load_policy: LoadPolicy,
    #[serde(default = "default_aux_channels")]
    pub aux_channels: usize,
    #[serde(default = "default_dropout_p")]
    pub dropout_p: f32,
    #[serde(default)]
    pub backbone: BackboneConfig,
}

impl IsaNetConfig {
    /// Default hyper-parameters for `num_classes` classes.
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            backbone_indices: default_backbone_indices(),
            isa_channels: default_isa_channels(),
            group_factor: default_group_factor(),
            enable_auxiliary_branch: true,
            align_corners: false,
            pretrained: None,
            load_policy: LoadPolicy::default(),
            aux_channels: default_aux_channels(),
            dropout_p: default_dropout_p(),
            backbone: BackboneConfig::default(),
        }
    }

    pub fn group_factor(&self) -> Result<GroupFactor> {
        GroupFactor::new(self.group_factor[0], self.group_factor[1])
    }

    /// Checks the values that do not depend on a backbone.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        self.collect_problems(&mut problems);
        self.backbone.collect_problems(&mut problems);
        finish(problems)
    }

    /// Validates against the channel counts a backbone publishes and returns
    /// the `[low, high]` input channels of the head.
    pub fn validate_against(&self, feat_channels: &[usize]) -> Result<[usize; 2]> {
        let mut problems = Vec::new();
        self.collect_problems(&mut problems);
        let mut channels = [0usize; 2];
        for (slot, &index) in self.backbone_indices.iter().enumerate() {
            match feat_channels.get(index) {
                Some(&c) => channels[slot] = c,
                None => problems.push(format!(
                    "backbone_indices[{slot}] = {index} is out of range for {} backbone stages",
                    feat_channels.len()
                )),
            }
        }
        let high = channels[1];
        if high != 0 && (high % 4 != 0 || high / 4 == 0) {
            problems.push(format!(
                "high-stage channels must be a positive multiple of 4, got {high}"
            ));
        }
        if channels[0] == 0 && feat_channels.get(self.backbone_indices[0]).is_some() {
            problems.push("low-stage channels must be non-zero".to_string());
        }
        finish(problems).map(|_| channels)
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        if self.num_classes == 0 {
            problems.push("num_classes must be greater than zero".to_string());
        }
        if self.isa_channels == 0 {
            problems.push("isa_channels must be greater than zero".to_string());
        }
        if self.enable_auxiliary_branch && self.aux_channels == 0 {
            problems.push("aux_channels must be greater than zero".to_string());
        }
        if self.group_factor.contains(&0) {
            problems.push(format!(
                "group_factor entries must be positive, got {:?}",
                self.group_factor
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            problems.push(format!(
                "dropout_p must be in [0, 1), got {}",
                self.dropout_p
            ));
        }
    }
}

/// Layout of [`PlainConvBackbone`](crate::backbone::PlainConvBackbone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackboneConfig {
    #[serde(default = "default_feat_channels")]
    pub feat_channels: Vec<usize>,
    /// Cumulative stride of every stage relative to the input.
    #[serde(default = "default_output_strides")]
    pub output_strides: Vec<usize>,
    #[serde(default = "default_stem_channels")]
    pub stem_channels: usize,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            feat_channels: default_feat_channels(),
            output_strides: default_output_strides(),
            stem_channels: default_stem_channels(),
        }
    }
}

impl BackboneConfig {
    /// Stem stride of the plain backbone.
    pub const STEM_STRIDE: usize = 2;

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        self.collect_problems(&mut problems);
        finish(problems)
    }

    /// Stride of each stage relative to its predecessor.
    pub fn stage_strides(&self) -> Vec<usize> {
        let mut previous = Self::STEM_STRIDE;
        self.output_strides
            .iter()
            .map(|&stride| {
                let relative = if previous == 0 { 0 } else { stride / previous };
                previous = stride;
                relative
            })
            .collect()
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        if self.feat_channels.is_empty() {
            problems.push("backbone.feat_channels must not be empty".to_string());
        }
        if self.feat_channels.len() != self.output_strides.len() {
            problems.push(format!(
                "backbone.feat_channels has {} entries but output_strides has {}",
                self.feat_channels.len(),
                self.output_strides.len()
            ));
        }
        if self.feat_channels.contains(&0) {
            problems.push("backbone.feat_channels entries must be non-zero".to_string());
        }
        if self.stem_channels == 0 {
            problems.push("backbone.stem_channels must be greater than zero".to_string());
        }
        let mut previous = Self::STEM_STRIDE;
        for (i, &stride) in self.output_strides.iter().enumerate() {
            if stride < previous || stride % previous != 0 {
                problems.push(format!(
                    "backbone.output_strides[{i}] = {stride} must be a multiple of the previous stride {previous}"
                ));
                break;
            }
            previous = stride;
        }
    }
}

fn finish(problems: Vec<String>) -> Result<()> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(SegmentationError::Configuration(problems.join("; ")))
    }
}

fn default_backbone_indices() -> [usize; 2] {
    [2, 3]
}

fn default_isa_channels() -> usize {
    256
}

fn default_group_factor() -> [usize; 2] {
    [8, 8]
}

fn default_true() -> bool {
    true
}

fn default_aux_channels() -> usize {
    256
}

fn default_dropout_p() -> f32 {
    0.1
}

fn default_feat_channels() -> Vec<usize> {
    vec![256, 512, 1024, 2048]
}

fn default_output_strides() -> Vec<usize> {
    vec![4, 8, 8, 8]
}

fn default_stem_channels() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() -> anyhow::Result<()> {
        let config: IsaNetConfig = serde_json::from_str(r#"{ "num_classes": 19 }"#)?;
        assert_eq!(config, IsaNetConfig::new(19));
        assert_eq!(config.backbone_indices, [2, 3]);
        assert_eq!(config.group_factor, [8, 8]);
        assert!(config.enable_auxiliary_branch);
        assert_eq!(config.load_policy, LoadPolicy::Partial);
        config.validate()?;
        Ok(())
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut config = IsaNetConfig::new(0);
        config.group_factor = [0, 8];
        config.dropout_p = 1.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("num_classes"));
        assert!(err.contains("group_factor"));
        assert!(err.contains("dropout_p"));
    }

    #[test]
    fn high_stage_channels_must_divide_by_four() {
        let config = IsaNetConfig::new(3);
        let err = config.validate_against(&[8, 16, 32, 30]).unwrap_err();
        assert!(matches!(err, SegmentationError::Configuration(_)));
        assert!(err.to_string().contains("multiple of 4"));
    }

    #[test]
    fn stage_indices_must_exist() {
        let config = IsaNetConfig::new(3);
        let err = config.validate_against(&[8, 16]).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn selected_channels_are_returned() -> anyhow::Result<()> {
        let config = IsaNetConfig::new(3);
        assert_eq!(config.validate_against(&[8, 16, 24, 32])?, [24, 32]);
        Ok(())
    }

    #[test]
    fn stage_strides_are_relative() -> anyhow::Result<()> {
        let backbone = BackboneConfig::default();
        backbone.validate()?;
        assert_eq!(backbone.stage_strides(), vec![2, 2, 1, 1]);
        let broken = BackboneConfig {
            output_strides: vec![4, 6, 8, 8],
            ..BackboneConfig::default()
        };
        assert!(broken.validate().is_err());
        Ok(())
    }
}
