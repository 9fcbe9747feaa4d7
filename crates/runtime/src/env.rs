//! Device placement, device count and data-loader worker selection.
//!
//! Everything is derived once from an [`EnvSnapshot`] into an immutable
//! [`RuntimeConfig`]; nothing here writes to the process environment.

use std::fmt;
use std::str::FromStr;

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Requested execution device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRequest {
    /// Use GPUs when the build supports them.
    #[default]
    Auto,
    Cpu,
    Gpu,
}

impl FromStr for DeviceRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Gpu),
            other => Err(format!("unknown device '{other}', expected auto, cpu or gpu")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Place {
    Cpu,
    Gpu,
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Cpu => f.write_str("cpu"),
            Place::Gpu => f.write_str("gpu"),
        }
    }
}

/// Data-loader worker count, either fixed or derived from the CPU count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "WorkerCountRepr", into = "WorkerCountRepr")]
pub enum WorkerCount {
    #[default]
    Auto,
    Fixed(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WorkerCountRepr {
    Fixed(usize),
    Keyword(String),
}

impl TryFrom<WorkerCountRepr> for WorkerCount {
    type Error = String;

    fn try_from(value: WorkerCountRepr) -> Result<Self, Self::Error> {
        match value {
            WorkerCountRepr::Fixed(n) => Ok(Self::Fixed(n)),
            WorkerCountRepr::Keyword(keyword) => keyword.parse(),
        }
    }
}

impl From<WorkerCount> for WorkerCountRepr {
    fn from(value: WorkerCount) -> Self {
        match value {
            WorkerCount::Auto => WorkerCountRepr::Keyword("auto".to_string()),
            WorkerCount::Fixed(n) => WorkerCountRepr::Fixed(n),
        }
    }
}

impl FromStr for WorkerCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        trimmed
            .parse::<usize>()
            .map(Self::Fixed)
            .map_err(|_| format!("worker count must be 'auto' or a number, got '{trimmed}'"))
    }
}

/// Inputs of the runtime decision, captured explicitly so detection is pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSnapshot {
    pub cuda_available: bool,
    pub request: DeviceRequest,
    /// Number of distributed ranks.
    pub nranks: usize,
    /// Value of `CPU_NUM`.
    pub cpu_num: usize,
    /// Logical CPUs of the host.
    pub cpu_count: usize,
}

impl EnvSnapshot {
    /// Reads `WORLD_SIZE` (or `PADDLE_TRAINERS_NUM`), `CPU_NUM` and the CPU
    /// count of the current process.
    pub fn from_process(request: DeviceRequest) -> Self {
        let nranks = ["WORLD_SIZE", "PADDLE_TRAINERS_NUM"]
            .iter()
            .find_map(|name| read_count(name))
            .unwrap_or(1);
        Self {
            cuda_available: candle_core::utils::cuda_is_available(),
            request,
            nranks,
            cpu_num: read_count("CPU_NUM").unwrap_or(1),
            cpu_count: num_cpus::get(),
        }
    }
}

fn read_count(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring non-numeric {name}={raw:?}");
            None
        }
    }
}

/// Where and on how many devices a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeConfig {
    place: Place,
    gpu_nums: usize,
    num: usize,
    hide_accelerators: bool,
    cpu_count: usize,
}

impl RuntimeConfig {
    pub fn detect(snapshot: &EnvSnapshot) -> Result<Self, RuntimeError> {
        if snapshot.request == DeviceRequest::Gpu && !snapshot.cuda_available {
            return Err(RuntimeError::initialization(
                "a gpu device was requested but CUDA support is not available",
            ));
        }

        let gpu_nums = if snapshot.cuda_available && snapshot.request != DeviceRequest::Cpu {
            snapshot.nranks
        } else {
            0
        };
        let place = if snapshot.cuda_available && gpu_nums > 0 {
            Place::Gpu
        } else {
            Place::Cpu
        };
        let num = match place {
            Place::Gpu => gpu_nums,
            Place::Cpu => snapshot.cpu_num,
        };

        let config = Self {
            place,
            gpu_nums,
            num,
            hide_accelerators: snapshot.cuda_available && gpu_nums == 0,
            cpu_count: snapshot.cpu_count,
        };
        log::debug!("runtime detected {config:?} from {snapshot:?}");
        Ok(config)
    }

    pub fn from_process(request: DeviceRequest) -> Result<Self, RuntimeError> {
        Self::detect(&EnvSnapshot::from_process(request))
    }

    pub fn place(&self) -> Place {
        self.place
    }

    pub fn gpu_nums(&self) -> usize {
        self.gpu_nums
    }

    /// Devices (GPU) or CPU places the run spreads over.
    pub fn num(&self) -> usize {
        self.num
    }

    /// CUDA is present but unused; accelerators should stay invisible to
    /// child processes.
    pub fn hide_accelerators(&self) -> bool {
        self.hide_accelerators
    }

    /// Device for the process with the given distributed rank.
    pub fn device(&self, rank: usize) -> Result<Device, RuntimeError> {
        match self.place {
            Place::Cpu => Ok(Device::Cpu),
            Place::Gpu => {
                let ordinal = rank % self.num.max(1);
                Device::new_cuda(ordinal).map_err(|err| {
                    RuntimeError::initialization(format!("cannot open cuda:{ordinal}: {err}"))
                })
            }
        }
    }

    pub fn num_workers(&self, workers: WorkerCount) -> usize {
        match workers {
            WorkerCount::Auto => (self.cpu_count / 2).min(8),
            WorkerCount::Fixed(n) => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_parses_keywords_and_numbers() {
        assert_eq!("auto".parse::<WorkerCount>(), Ok(WorkerCount::Auto));
        assert_eq!(" 3 ".parse::<WorkerCount>(), Ok(WorkerCount::Fixed(3)));
        assert!("many".parse::<WorkerCount>().is_err());
    }

    #[test]
    fn worker_count_serde_accepts_both_forms() -> anyhow::Result<()> {
        let auto: WorkerCount = serde_json::from_str("\"auto\"")?;
        let fixed: WorkerCount = serde_json::from_str("4")?;
        assert_eq!(auto, WorkerCount::Auto);
        assert_eq!(fixed, WorkerCount::Fixed(4));
        assert_eq!(serde_json::to_string(&WorkerCount::Auto)?, "\"auto\"");
        Ok(())
    }

    #[test]
    fn device_request_parses_aliases() {
        assert_eq!("CUDA".parse::<DeviceRequest>(), Ok(DeviceRequest::Gpu));
        assert_eq!("cpu".parse::<DeviceRequest>(), Ok(DeviceRequest::Cpu));
        assert!("tpu".parse::<DeviceRequest>().is_err());
    }
}
