use std::str::FromStr;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default level filter; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub timestamps: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            timestamps: false,
        }
    }
}

impl LoggingSettings {
    pub fn level_filter(&self) -> Result<LevelFilter, RuntimeError> {
        LevelFilter::from_str(self.level.trim()).map_err(|_| {
            RuntimeError::validation(vec![format!(
                "logging.level must be one of off, error, warn, info, debug, trace (got '{}')",
                self.level
            )])
        })
    }
}

/// Installs the global `env_logger`; a second call is an error.
pub fn init(settings: &LoggingSettings) -> Result<(), RuntimeError> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(settings.level_filter()?);
    builder.parse_default_env();
    if settings.timestamps {
        builder.format_timestamp_millis();
    } else {
        builder.format_timestamp(None);
    }
    builder
        .try_init()
        .map_err(|err| RuntimeError::initialization(format!("failed to install logger: {err}")))
}

fn default_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        let settings = LoggingSettings {
            level: "DEBUG".to_string(),
            timestamps: true,
        };
        assert_eq!(settings.level_filter().unwrap(), LevelFilter::Debug);
    }

    #[test]
    fn unknown_level_is_a_validation_error() {
        let settings = LoggingSettings {
            level: "chatty".to_string(),
            ..LoggingSettings::default()
        };
        assert!(matches!(
            settings.level_filter(),
            Err(RuntimeError::Validation(_))
        ));
    }
}
