// GPU metrics collection
// nvidia-smi CSV queries first, NVML as a fallback; no GPU tooling means no GPUs
use crate::error::{ControlError, Result};
use crate::models::telemetry::{percent_of, GpuSample};
use log::debug;
use nvml_wrapper::Nvml;
use std::io;
use std::path::PathBuf;
use std::process::Command;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

const MIB: u64 = 1024 * 1024;

const SMI_QUERY: [&str; 2] = [
    "--query-gpu=index,name,utilization.gpu,memory.used,memory.total",
    "--format=csv,noheader,nounits",
];

fn default_smi_candidates() -> Vec<PathBuf> {
    ["nvidia-smi", "/usr/bin/nvidia-smi", "/usr/local/bin/nvidia-smi"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

/// Parse `index, name, util, mem_used_mib, mem_total_mib` lines.
/// Lines without a numeric index are skipped; unreadable counters read as 0.
pub fn parse_nvidia_smi_csv(output: &str) -> Vec<GpuSample> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 5 {
                return None;
            }
            let index = parts[0].parse::<u32>().ok()?;
            let util = parts[2].parse::<u32>().unwrap_or(0);
            let mem_used = parts[3].parse::<u64>().unwrap_or(0) * MIB;
            let mem_total = parts[4].parse::<u64>().unwrap_or(0) * MIB;
            Some(GpuSample {
                index,
                name: parts[1].to_string(),
                utilization_percent: util,
                mem_used,
                mem_total,
                mem_pct: percent_of(mem_used as f64, mem_total as f64),
            })
        })
        .collect()
}

/// GPU query front end used by the sampler
pub struct GpuProbe {
    smi_candidates: Vec<PathBuf>,
    nvml: Option<Nvml>,
}

impl GpuProbe {
    pub fn new() -> Self {
        let nvml = Nvml::init().ok();
        if nvml.is_some() {
            debug!("NVML initialized for GPU fallback queries");
        } else {
            debug!("NVML not available");
        }
        Self {
            smi_candidates: default_smi_candidates(),
            nvml,
        }
    }

    /// Probe that only tries the given nvidia-smi paths
    pub fn with_smi_candidates(candidates: Vec<PathBuf>) -> Self {
        Self {
            smi_candidates: candidates,
            nvml: None,
        }
    }

    pub fn collect(&self) -> Result<Vec<GpuSample>> {
        let smi_failure = match self.query_smi() {
            Ok(gpus) if !gpus.is_empty() => return Ok(gpus),
            Ok(_) => None,
            Err(e) => Some(e),
        };

        if let Some(nvml) = &self.nvml {
            return query_nvml(nvml);
        }

        match smi_failure {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    /// `Ok(empty)` when no candidate exists; `Err` when a tool ran but failed
    fn query_smi(&self) -> Result<Vec<GpuSample>> {
        let mut failure = None;
        for exe in &self.smi_candidates {
            let mut cmd = Command::new(exe);
            cmd.args(SMI_QUERY);

            #[cfg(windows)]
            cmd.creation_flags(CREATE_NO_WINDOW);

            let output = match cmd.output() {
                Ok(output) => output,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    failure = Some(format!("{:?}: {}", exe, e));
                    continue;
                }
            };
            if !output.status.success() {
                failure = Some(format!("{:?} exited with {}", exe, output.status));
                continue;
            }
            let gpus = parse_nvidia_smi_csv(&String::from_utf8_lossy(&output.stdout));
            if !gpus.is_empty() {
                return Ok(gpus);
            }
        }
        match failure {
            Some(reason) => Err(ControlError::Sampling(reason)),
            None => Ok(Vec::new()),
        }
    }
}

impl Default for GpuProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn query_nvml(nvml: &Nvml) -> Result<Vec<GpuSample>> {
    let count = nvml
        .device_count()
        .map_err(|e| ControlError::Sampling(format!("NVML device count: {}", e)))?;

    let mut gpus = Vec::with_capacity(count as usize);
    for index in 0..count {
        let device = nvml
            .device_by_index(index)
            .map_err(|e| ControlError::Sampling(format!("NVML device {}: {}", index, e)))?;
        let memory = device
            .memory_info()
            .map_err(|e| ControlError::Sampling(format!("NVML memory {}: {}", index, e)))?;
        let util = device.utilization_rates().map(|u| u.gpu).unwrap_or(0);

        gpus.push(GpuSample {
            index,
            name: device.name().unwrap_or_default(),
            utilization_percent: util,
            mem_used: memory.used,
            mem_total: memory.total,
            mem_pct: percent_of(memory.used as f64, memory.total as f64),
        });
    }
    Ok(gpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv() {
        let out = "0, NVIDIA A100-SXM4-80GB, 87, 40960, 81920\n1, NVIDIA A100-SXM4-80GB, [N/A], 0, 81920\n";
        let gpus = parse_nvidia_smi_csv(out);
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].index, 0);
        assert_eq!(gpus[0].name, "NVIDIA A100-SXM4-80GB");
        assert_eq!(gpus[0].utilization_percent, 87);
        assert_eq!(gpus[0].mem_used, 40960 * MIB);
        assert_eq!(gpus[0].mem_pct, 50);
        assert_eq!(gpus[1].utilization_percent, 0);
        assert_eq!(gpus[1].mem_pct, 0);
    }

    #[test]
    fn test_parse_skips_short_and_garbage_lines() {
        let gpus = parse_nvidia_smi_csv("No devices were found\nfoo, bar, 1, 2, 3\n");
        assert!(gpus.is_empty());
    }

    #[test]
    fn test_missing_tool_means_no_gpus() {
        let probe = GpuProbe::with_smi_candidates(vec![PathBuf::from("/nonexistent/nvidia-smi")]);
        assert_eq!(probe.collect().unwrap(), Vec::new());
    }

    #[cfg(unix)]
    #[test]
    fn test_crashing_tool_is_sampling_error() {
        let probe = GpuProbe::with_smi_candidates(vec![PathBuf::from("/bin/false")]);
        assert!(matches!(probe.collect(), Err(ControlError::Sampling(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_reads_from_fake_tool() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("nvidia-smi");
        std::fs::write(&tool, "#!/bin/sh\necho '0, Test GPU, 12, 1024, 4096'\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let probe = GpuProbe::with_smi_candidates(vec![tool]);
        let gpus = probe.collect().unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].mem_pct, 25);
    }
}
