// Control plane settings, loaded from environment variables at startup
use crate::utils::{
    get_config_dir, get_logs_dir, get_telemetry_history_path, get_workspace_root,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PULL_TOOL: &str = "/opt/pilot/get-models.sh";
pub const DEFAULT_TRAINPILOT_BIN: &str = "/opt/pilot/apps/TrainPilot/trainpilot.sh";
pub const DEFAULT_TRAINPILOT_TOML: &str = "/opt/pilot/apps/TrainPilot/newlora.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    pub history_path: PathBuf,
    pub sample_seconds: u64,
    pub retention_seconds: u64,
    pub compaction_interval_seconds: u64,
}

impl TelemetrySettings {
    pub fn new(history_path: impl Into<PathBuf>) -> Self {
        Self {
            history_path: history_path.into(),
            sample_seconds: 30,
            retention_seconds: 24 * 3600,
            compaction_interval_seconds: 600,
        }
    }

    pub fn with_retention_seconds(mut self, seconds: u64) -> Self {
        self.retention_seconds = seconds;
        self
    }

    pub fn with_sample_seconds(mut self, seconds: u64) -> Self {
        self.sample_seconds = seconds;
        self
    }

    pub fn with_compaction_interval_seconds(mut self, seconds: u64) -> Self {
        self.compaction_interval_seconds = seconds;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Finished records older than this are evicted
    pub ttl_seconds: u64,
    pub stop_grace_seconds: u64,
    /// Reject progress values lower than the last one seen
    pub monotonic_progress: bool,
}

impl JobSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 10 * 60,
            stop_grace_seconds: 5,
            monotonic_progress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub workspace_root: PathBuf,
    pub logs_dir: PathBuf,
    pub log_level: String,
    pub log_json: bool,
    pub pull_tool: PathBuf,
    pub trainpilot_bin: PathBuf,
    pub trainpilot_toml: PathBuf,
    pub jobs: JobSettings,
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Defaults rooted at `workspace_root`, without reading the environment
    pub fn for_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let config_dir = get_config_dir(&workspace_root);
        Self {
            logs_dir: get_logs_dir(&workspace_root),
            log_level: "info".to_string(),
            log_json: false,
            pull_tool: PathBuf::from(DEFAULT_PULL_TOOL),
            trainpilot_bin: PathBuf::from(DEFAULT_TRAINPILOT_BIN),
            trainpilot_toml: PathBuf::from(DEFAULT_TRAINPILOT_TOML),
            jobs: JobSettings::default(),
            telemetry: TelemetrySettings::new(get_telemetry_history_path(&config_dir)),
            workspace_root,
        }
    }

    pub fn from_env() -> Self {
        let mut settings = Self::for_workspace(get_workspace_root());

        if let Some(dir) = env_path("PILOT_LOG_DIR") {
            settings.logs_dir = dir;
        }
        settings.log_level = env_or("PILOT_LOG", "info");
        settings.log_json = env_flag("PILOT_LOG_JSON");

        if let Some(tool) = env_path("PILOT_PULL_TOOL") {
            settings.pull_tool = tool;
        }
        if let Some(bin) = env_path("TRAINPILOT_BIN") {
            settings.trainpilot_bin = bin;
        }
        if let Some(toml) = env_path("TRAINPILOT_TOML") {
            settings.trainpilot_toml = toml;
        }

        settings.jobs.ttl_seconds = parse_env("PILOT_JOB_TTL_SECONDS", 600);
        settings.jobs.stop_grace_seconds = parse_env("PILOT_STOP_GRACE_SECONDS", 5);
        settings.jobs.monotonic_progress = env_flag("PILOT_MONOTONIC_PROGRESS");

        settings.telemetry.sample_seconds =
            parse_env("TELEMETRY_HISTORY_SAMPLE_SECONDS", 30).max(5);
        settings.telemetry.retention_seconds =
            parse_env("TELEMETRY_HISTORY_MAX_SECONDS", 24 * 3600).max(60);
        settings.telemetry.compaction_interval_seconds =
            parse_env("TELEMETRY_HISTORY_COMPACT_SECONDS", 600).max(60);

        settings
    }

    pub fn config_dir(&self) -> PathBuf {
        get_config_dir(&self.workspace_root)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_defaults() {
        let settings = Settings::for_workspace("/tmp/ws");
        assert_eq!(
            settings.telemetry.history_path,
            PathBuf::from("/tmp/ws/config/telemetry_history.jsonl")
        );
        assert_eq!(settings.logs_dir, PathBuf::from("/tmp/ws/logs"));
        assert_eq!(settings.telemetry.sample_seconds, 30);
        assert_eq!(settings.telemetry.retention_seconds, 86_400);
        assert_eq!(settings.telemetry.compaction_interval_seconds, 600);
        assert_eq!(settings.jobs.ttl(), Duration::from_secs(600));
        assert_eq!(settings.jobs.stop_grace(), Duration::from_secs(5));
        assert!(!settings.jobs.monotonic_progress);
    }
}
