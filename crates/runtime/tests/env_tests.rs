use anyhow::Result;
use candle_core::Device;
use runtime::{DeviceRequest, EnvSnapshot, Place, RuntimeConfig, RuntimeError, WorkerCount};

fn snapshot(cuda_available: bool, request: DeviceRequest, nranks: usize) -> EnvSnapshot {
    EnvSnapshot {
        cuda_available,
        request,
        nranks,
        cpu_num: 3,
        cpu_count: 12,
    }
}

#[test]
fn gpu_is_used_when_cuda_and_ranks_are_present() -> Result<()> {
    let runtime = RuntimeConfig::detect(&snapshot(true, DeviceRequest::Auto, 4))?;
    assert_eq!(runtime.place(), Place::Gpu);
    assert_eq!(runtime.gpu_nums(), 4);
    assert_eq!(runtime.num(), 4);
    assert!(!runtime.hide_accelerators());
    Ok(())
}

#[test]
fn cpu_without_cuda_uses_cpu_num() -> Result<()> {
    let runtime = RuntimeConfig::detect(&snapshot(false, DeviceRequest::Auto, 4))?;
    assert_eq!(runtime.place(), Place::Cpu);
    assert_eq!(runtime.gpu_nums(), 0);
    assert_eq!(runtime.num(), 3);
    assert!(!runtime.hide_accelerators());
    assert!(matches!(runtime.device(7)?, Device::Cpu));
    Ok(())
}

#[test]
fn cpu_request_hides_available_accelerators() -> Result<()> {
    let runtime = RuntimeConfig::detect(&snapshot(true, DeviceRequest::Cpu, 2))?;
    assert_eq!(runtime.place(), Place::Cpu);
    assert_eq!(runtime.num(), 3);
    assert!(runtime.hide_accelerators());
    Ok(())
}

#[test]
fn zero_ranks_fall_back_to_cpu() -> Result<()> {
    let runtime = RuntimeConfig::detect(&snapshot(true, DeviceRequest::Auto, 0))?;
    assert_eq!(runtime.place(), Place::Cpu);
    assert!(runtime.hide_accelerators());
    Ok(())
}

#[test]
fn gpu_request_without_cuda_fails() {
    let err = RuntimeConfig::detect(&snapshot(false, DeviceRequest::Gpu, 1)).unwrap_err();
    assert!(matches!(err, RuntimeError::Initialization(_)));
}

#[test]
fn auto_workers_are_half_the_cpus_capped_at_eight() -> Result<()> {
    for (cpus, expected) in [(1, 0), (4, 2), (12, 6), (16, 8), (64, 8)] {
        let runtime = RuntimeConfig::detect(&EnvSnapshot {
            cpu_count: cpus,
            ..snapshot(false, DeviceRequest::Cpu, 1)
        })?;
        assert_eq!(runtime.num_workers(WorkerCount::Auto), expected, "cpus={cpus}");
        assert_eq!(runtime.num_workers(WorkerCount::Fixed(5)), 5);
    }
    Ok(())
}

#[test]
fn process_snapshot_reports_host_cpus() {
    let snapshot = EnvSnapshot::from_process(DeviceRequest::Cpu);
    assert!(snapshot.cpu_count >= 1);
    assert_eq!(snapshot.request, DeviceRequest::Cpu);
}
