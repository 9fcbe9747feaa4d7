use std::fmt;

use isanet::SegmentationError;

#[derive(Debug)]
pub enum RuntimeError {
    Io(std::io::Error),
    ConfigFormat(String),
    Validation(Vec<String>),
    Initialization(String),
    Runtime(String),
    Model(SegmentationError),
}

impl RuntimeError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Io(err) => write!(f, "i/o error: {}", err),
            RuntimeError::ConfigFormat(err) => write!(f, "failed to parse config: {}", err),
            RuntimeError::Validation(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
            RuntimeError::Initialization(msg) => write!(f, "initialization failed: {}", msg),
            RuntimeError::Runtime(msg) => write!(f, "runtime error: {}", msg),
            RuntimeError::Model(err) => write!(f, "model error: {}", err),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::Io(err) => Some(err),
            RuntimeError::Model(err) => Some(err),
            RuntimeError::ConfigFormat(_)
            | RuntimeError::Validation(_)
            | RuntimeError::Initialization(_)
            | RuntimeError::Runtime(_) => None,
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(value: std::io::Error) -> Self {
        RuntimeError::Io(value)
    }
}

impl From<toml::de::Error> for RuntimeError {
    fn from(value: toml::de::Error) -> Self {
        RuntimeError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(value: serde_json::Error) -> Self {
        RuntimeError::ConfigFormat(value.to_string())
    }
}

impl From<SegmentationError> for RuntimeError {
    fn from(value: SegmentationError) -> Self {
        RuntimeError::Model(value)
    }
}

impl From<candle_core::Error> for RuntimeError {
    fn from(value: candle_core::Error) -> Self {
        RuntimeError::Runtime(value.to_string())
    }
}

impl From<image::ImageError> for RuntimeError {
    fn from(value: image::ImageError) -> Self {
        match value {
            image::ImageError::IoError(err) => RuntimeError::Io(err),
            other => RuntimeError::Runtime(format!("image error: {other}")),
        }
    }
}
