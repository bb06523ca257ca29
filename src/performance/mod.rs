// Telemetry collection and history
pub mod collector;
pub mod gpu;
pub mod history;
pub mod sampler;

pub use collector::{cpu_percent_from_load, PerformanceCollector, PointSource};
pub use gpu::{parse_nvidia_smi_csv, GpuProbe};
pub use history::{AppendOutcome, TelemetryStore};
pub use sampler::{start_sampler, stop_sampler, MonitoringState};
