//! Reading and writing model variables as safetensors.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};

/// How [`load_pretrained`] treats variables the file cannot supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Every variable must be present with the expected shape.
    Strict,
    /// Apply whatever matches, warn about the rest.
    #[default]
    Partial,
}

/// Outcome of a [`load_pretrained`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub missing: Vec<String>,
    /// `(name, expected shape, file shape)`.
    pub mismatched: Vec<(String, Vec<usize>, Vec<usize>)>,
    /// Tensors in the file that the model does not use.
    pub unused: Vec<String>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

/// Copies tensors from the safetensors file at `path` into `varmap`.
///
/// Values are converted to each variable's dtype and device. Under
/// [`LoadPolicy::Strict`] nothing is written unless every variable matches.
pub fn load_pretrained(varmap: &VarMap, path: &Path, policy: LoadPolicy) -> Result<LoadReport> {
    let mut tensors = candle_core::safetensors::load(path, &Device::Cpu).map_err(|err| {
        SegmentationError::weights(format!("cannot read {}: {err}", path.display()))
    })?;

    let vars = varmap
        .data()
        .lock()
        .map_err(|_| SegmentationError::weights("variable map lock poisoned"))?;

    let mut report = LoadReport::default();
    let mut updates = Vec::new();
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();
    for name in names {
        let var = &vars[name];
        match tensors.remove(name.as_str()) {
            None => report.missing.push(name.clone()),
            Some(tensor) if tensor.dims() != var.dims() => report.mismatched.push((
                name.clone(),
                var.dims().to_vec(),
                tensor.dims().to_vec(),
            )),
            Some(tensor) => updates.push((name.clone(), var, tensor)),
        }
    }
    report.unused = tensors.into_keys().collect();
    report.unused.sort();

    if policy == LoadPolicy::Strict && !report.is_complete() {
        let mut offending = report.missing.clone();
        offending.extend(report.mismatched.iter().map(|(name, expected, found)| {
            format!("{name} (expected {expected:?}, found {found:?})")
        }));
        return Err(SegmentationError::weights(format!(
            "{} does not match the model: {}",
            path.display(),
            offending.join(", ")
        )));
    }
    if updates.is_empty() {
        return Err(SegmentationError::weights(format!(
            "no tensor in {} matches the model",
            path.display()
        )));
    }

    for name in &report.missing {
        log::warn!("{name} is not in pretrained weights");
    }
    for (name, expected, found) in &report.mismatched {
        log::warn!(
            "[SKIP] shape of pretrained params {name} {found:?} does not match model {expected:?}"
        );
    }

    // Every conversion happens before the first assignment.
    let prepared = updates
        .into_iter()
        .map(|(name, var, tensor)| -> Result<_> {
            let value = tensor
                .to_dtype(var.dtype())
                .and_then(|t| t.to_device(var.device()))
                .map_err(|err| {
                    SegmentationError::weights(format!("cannot convert {name}: {err}"))
                })?;
            Ok((name, var, value))
        })
        .collect::<Result<Vec<_>>>()?;

    for (name, var, value) in prepared {
        var.set(&value)
            .map_err(|err| SegmentationError::weights(format!("cannot assign {name}: {err}")))?;
        report.loaded.push(name);
    }

    log::info!(
        "loaded {}/{} pretrained tensors from {}",
        report.loaded.len(),
        vars.len(),
        path.display()
    );
    Ok(report)
}

/// Writes every variable of `varmap` to `path`.
pub fn save_weights(varmap: &VarMap, path: &Path) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| SegmentationError::weights("variable map lock poisoned"))?;
    let tensors: HashMap<String, Tensor> = vars
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect();
    candle_core::safetensors::save(&tensors, path).map_err(|err| {
        SegmentationError::weights(format!("cannot write {}: {err}", path.display()))
    })?;
    log::info!("saved {} tensors to {}", tensors.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{Init, VarBuilder};

    fn varmap_with(shapes: &[(&str, (usize, usize))]) -> anyhow::Result<VarMap> {
        let varmap = VarMap::new();
        for (name, shape) in shapes {
            varmap.get(*shape, name, Init::Const(0.0), DType::F32, &Device::Cpu)?;
        }
        Ok(varmap)
    }

    fn write(path: &Path, tensors: &[(&str, Tensor)]) -> anyhow::Result<()> {
        let map: HashMap<String, Tensor> = tensors
            .iter()
            .map(|(name, t)| (name.to_string(), t.clone()))
            .collect();
        candle_core::safetensors::save(&map, path)?;
        Ok(())
    }

    #[test]
    fn partial_load_skips_mismatches() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("weights.safetensors");
        write(
            &path,
            &[
                ("a", Tensor::ones((2, 2), DType::F32, &Device::Cpu)?),
                ("b", Tensor::ones((3, 1), DType::F32, &Device::Cpu)?),
                ("extra", Tensor::ones(1, DType::F32, &Device::Cpu)?),
            ],
        )?;
        let varmap = varmap_with(&[("a", (2, 2)), ("b", (2, 1)), ("c", (1, 1))])?;
        let report = load_pretrained(&varmap, &path, LoadPolicy::Partial)?;
        assert_eq!(report.loaded, vec!["a".to_string()]);
        assert_eq!(report.missing, vec!["c".to_string()]);
        assert_eq!(report.mismatched.len(), 1);
        assert_eq!(report.unused, vec!["extra".to_string()]);

        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let a = vb.get((2, 2), "a")?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(a, 4.0);
        let b = vb.get((2, 1), "b")?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(b, 0.0);
        Ok(())
    }

    #[test]
    fn stored_dtypes_are_converted_before_assignment() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("weights.safetensors");
        write(
            &path,
            &[
                ("a", Tensor::ones((2, 2), DType::F16, &Device::Cpu)?),
                ("b", Tensor::new(&[[1.5f64], [2.5]], &Device::Cpu)?),
            ],
        )?;
        let varmap = varmap_with(&[("a", (2, 2)), ("b", (2, 1)), ("c", (1, 1))])?;
        let report = load_pretrained(&varmap, &path, LoadPolicy::Partial)?;
        assert_eq!(report.loaded, vec!["a".to_string(), "b".to_string()]);

        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let a = vb.get((2, 2), "a")?;
        assert_eq!(a.dtype(), DType::F32);
        assert_eq!(a.sum_all()?.to_scalar::<f32>()?, 4.0);
        let b = vb.get((2, 1), "b")?.to_vec2::<f32>()?;
        assert_eq!(b, vec![vec![1.5], vec![2.5]]);
        Ok(())
    }

    #[test]
    fn strict_load_leaves_variables_untouched() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("weights.safetensors");
        write(&path, &[("a", Tensor::ones((2, 2), DType::F32, &Device::Cpu)?)])?;
        let varmap = varmap_with(&[("a", (2, 2)), ("b", (2, 1))])?;
        let err = load_pretrained(&varmap, &path, LoadPolicy::Strict).unwrap_err();
        assert!(matches!(err, SegmentationError::WeightLoad(_)));
        assert!(err.to_string().contains('b'));

        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let a = vb.get((2, 2), "a")?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(a, 0.0);
        Ok(())
    }

    #[test]
    fn nothing_matching_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("weights.safetensors");
        write(&path, &[("z", Tensor::ones(3, DType::F32, &Device::Cpu)?)])?;
        let varmap = varmap_with(&[("a", (2, 2))])?;
        assert!(load_pretrained(&varmap, &path, LoadPolicy::Partial).is_err());
        Ok(())
    }

    #[test]
    fn unreadable_file_is_a_weight_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("garbage.safetensors");
        std::fs::write(&path, b"not a tensor file")?;
        let varmap = varmap_with(&[("a", (2, 2))])?;
        let err = load_pretrained(&varmap, &path, LoadPolicy::Partial).unwrap_err();
        assert!(matches!(err, SegmentationError::WeightLoad(_)));
        Ok(())
    }
}
