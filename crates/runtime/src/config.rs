use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use isanet::IsaNetConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::env::{DeviceRequest, WorkerCount};
use crate::error::RuntimeError;
use crate::logging::LoggingSettings;

/// Everything a segmentation run reads from its configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub model: IsaNetConfig,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default)]
    pub device: DeviceRequest,
    #[serde(default)]
    pub num_workers: WorkerCount,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl RunConfig {
    /// Reads TOML (or JSON, by extension), resolves relative paths against the
    /// file's directory and validates the result.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: RunConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(RuntimeError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    /// Applies `key.path=value` overrides through the serialized form.
    pub fn with_overrides(self, overrides: &[Override]) -> Result<Self, RuntimeError> {
        if overrides.is_empty() {
            return Ok(self);
        }
        let mut value = serde_json::to_value(self).map_err(|err| {
            RuntimeError::runtime(format!("failed to serialize config for overrides: {err}"))
        })?;

        for item in overrides {
            set_value_at_path(&mut value, &item.path, parse_override_value(&item.value))?;
        }

        serde_json::from_value(value).map_err(|err| {
            RuntimeError::ConfigFormat(format!(
                "failed to deserialize config after overrides: {err}"
            ))
        })
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        let mut errors = Vec::new();

        if let Err(err) = self.model.validate() {
            errors.push(err.to_string());
        }

        if let Some(path) = &self.model.pretrained {
            if path.as_os_str().is_empty() {
                errors.push("model.pretrained must not be empty".to_string());
            }
        }

        if let Err(RuntimeError::Validation(messages)) = self.logging.level_filter() {
            errors.extend(messages);
        }

        if !errors.is_empty() {
            return Err(RuntimeError::validation(errors));
        }

        Ok(())
    }

    fn apply_base_path(&mut self, base: &Path) {
        if let Some(path) = self.model.pretrained.as_mut() {
            absolutize_in_place(path, base);
        }
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

/// One `KEY=VALUE` command-line override with a dot-separated key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub path: String,
    pub value: String,
}

impl FromStr for Override {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, value) = s
            .split_once('=')
            .ok_or_else(|| "override must be in the form key=value".to_string())?;
        if path.trim().is_empty() {
            return Err("override key must not be empty".into());
        }
        Ok(Self {
            path: path.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

impl fmt::Display for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.path, self.value)
    }
}

fn parse_override_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if trimmed.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(int_val) = trimmed.parse::<i64>() {
        return Value::Number(Number::from(int_val));
    }
    if let Ok(float_val) = trimmed.parse::<f64>() {
        if let Some(number) = Number::from_f64(float_val) {
            return Value::Number(number);
        }
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json_val) = serde_json::from_str::<Value>(trimmed) {
            return json_val;
        }
    }
    Value::String(trimmed.to_string())
}

#[derive(Debug)]
struct PathSegment {
    key: String,
    index: Option<usize>,
}

fn parse_path(path: &str) -> Result<Vec<PathSegment>, RuntimeError> {
    path.split('.')
        .map(|segment| {
            if let Some((base, idx_part)) = segment.split_once('[') {
                let idx_str = idx_part.trim_end_matches(']');
                let index = idx_str.parse::<usize>().map_err(|err| {
                    RuntimeError::runtime(format!(
                        "invalid index in override path '{}': {}",
                        segment, err
                    ))
                })?;
                Ok(PathSegment {
                    key: base.to_string(),
                    index: Some(index),
                })
            } else {
                Ok(PathSegment {
                    key: segment.to_string(),
                    index: None,
                })
            }
        })
        .collect()
}

fn set_value_at_path(target: &mut Value, path: &str, new_value: Value) -> Result<(), RuntimeError> {
    let segments = parse_path(path)?;
    if segments.iter().any(|segment| segment.key.is_empty()) {
        return Err(RuntimeError::runtime(format!(
            "override path '{path}' contains an empty segment"
        )));
    }
    assign_at_path(target, &segments, new_value)
}

fn assign_at_path(
    target: &mut Value,
    segments: &[PathSegment],
    new_value: Value,
) -> Result<(), RuntimeError> {
    let Some((segment, rest)) = segments.split_first() else {
        *target = new_value;
        return Ok(());
    };

    if target.is_null() {
        *target = Value::Object(serde_json::Map::new());
    }
    let Some(map) = target.as_object_mut() else {
        return Err(RuntimeError::runtime(format!(
            "override path segment '{}' points into a non-object value",
            segment.key
        )));
    };
    let entry = map.entry(segment.key.clone()).or_insert(Value::Null);

    match segment.index {
        Some(array_index) => {
            if entry.is_null() {
                *entry = Value::Array(Vec::new());
            }
            let Some(array) = entry.as_array_mut() else {
                return Err(RuntimeError::runtime(format!(
                    "override path segment '{}' expects array value",
                    segment.key
                )));
            };
            while array.len() <= array_index {
                array.push(Value::Null);
            }
            assign_at_path(&mut array[array_index], rest, new_value)
        }
        None => assign_at_path(entry, rest, new_value),
    }
}
