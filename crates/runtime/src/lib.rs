//! Process-level plumbing for ISANet runs: device and worker selection,
//! configuration files with command-line overrides, logging setup and image
//! input/output.

pub mod config;
pub mod env;
pub mod error;
pub mod image_io;
pub mod logging;

pub use config::{Override, RunConfig, RuntimeSettings};
pub use env::{DeviceRequest, EnvSnapshot, Place, RuntimeConfig, WorkerCount};
pub use error::RuntimeError;
pub use logging::LoggingSettings;
