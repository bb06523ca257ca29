// Telemetry history data structures
// Field names match the on-disk JSON-lines format
use serde::{Deserialize, Serialize};

/// One periodic host sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryPoint {
    /// Seconds since the Unix epoch
    #[serde(rename = "ts")]
    pub timestamp: f64,
    #[serde(default)]
    pub cpu: CpuSample,
    #[serde(default)]
    pub gpus: Vec<GpuSample>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CpuSample {
    #[serde(default)]
    pub load_avg: [f64; 3],
    #[serde(default)]
    pub cpu_count: u32,
    /// Load-derived utilization, clamped to 0-100
    #[serde(rename = "pct", default)]
    pub utilization_percent: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GpuSample {
    pub index: u32,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "util", default)]
    pub utilization_percent: u32,
    /// Bytes
    #[serde(default)]
    pub mem_used: u64,
    /// Bytes
    #[serde(default)]
    pub mem_total: u64,
    #[serde(default)]
    pub mem_pct: u8,
}

/// Windowed read of the telemetry history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryWindow {
    pub sample_seconds: u64,
    pub retention_seconds: u64,
    pub available_seconds: f64,
    pub from_ts: Option<f64>,
    pub to_ts: Option<f64>,
    pub points: Vec<TelemetryPoint>,
}

impl HistoryWindow {
    pub fn empty(sample_seconds: u64, retention_seconds: u64) -> Self {
        Self {
            sample_seconds,
            retention_seconds,
            available_seconds: 0.0,
            from_ts: None,
            to_ts: None,
            points: Vec::new(),
        }
    }
}

/// `round(part / whole * 100)` clamped to 0-100; zero when `whole` is zero
pub fn percent_of(part: f64, whole: f64) -> u8 {
    if whole <= 0.0 || !part.is_finite() || !whole.is_finite() {
        return 0;
    }
    ((part / whole) * 100.0).round().clamp(0.0, 100.0) as u8
}
