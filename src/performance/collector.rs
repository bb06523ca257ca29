// Telemetry point collector
use super::gpu::GpuProbe;
use crate::error::Result;
use crate::models::telemetry::{percent_of, CpuSample, TelemetryPoint};
use crate::utils::now_secs;
use sysinfo::{CpuRefreshKind, RefreshKind, System};

/// Anything that can produce a telemetry point on demand
pub trait PointSource: Send {
    fn sample(&mut self) -> Result<TelemetryPoint>;
}

/// Utilization estimate from the 1-minute load average
pub fn cpu_percent_from_load(load_avg: &[f64; 3], cpu_count: u32) -> u8 {
    percent_of(load_avg[0], cpu_count.max(1) as f64)
}

/// Host collector: load average plus whatever GPUs the probe can see.
/// The core count is cached at initialization.
pub struct PerformanceCollector {
    gpu: GpuProbe,
    cached_cpu_count: u32,
}

impl PerformanceCollector {
    pub fn new() -> Self {
        Self::with_gpu_probe(GpuProbe::new())
    }

    pub fn with_gpu_probe(gpu: GpuProbe) -> Self {
        let system =
            System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
        let cached_cpu_count = match system.cpus().len() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        } as u32;

        Self {
            gpu,
            cached_cpu_count,
        }
    }

    pub fn cpu_count(&self) -> u32 {
        self.cached_cpu_count
    }

    fn collect_cpu(&self) -> CpuSample {
        let load = System::load_average();
        let load_avg = [load.one, load.five, load.fifteen];
        CpuSample {
            load_avg,
            cpu_count: self.cached_cpu_count,
            utilization_percent: cpu_percent_from_load(&load_avg, self.cached_cpu_count),
        }
    }
}

impl Default for PerformanceCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl PointSource for PerformanceCollector {
    fn sample(&mut self) -> Result<TelemetryPoint> {
        let cpu = self.collect_cpu();
        let gpus = self.gpu.collect()?;
        Ok(TelemetryPoint {
            timestamp: now_secs(),
            cpu,
            gpus,
        })
    }
}
