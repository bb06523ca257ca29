use crate::error::{ControlError, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_WORKSPACE_ROOT: &str = "/workspace";

/// Resolve the workspace root: `WORKSPACE_ROOT`, then `/workspace`, then the
/// platform data directory.
pub fn get_workspace_root() -> PathBuf {
    if let Ok(root) = std::env::var("WORKSPACE_ROOT") {
        let root = root.trim();
        if !root.is_empty() {
            return PathBuf::from(root);
        }
    }

    let default_root = PathBuf::from(DEFAULT_WORKSPACE_ROOT);
    if default_root.exists() {
        return default_root;
    }

    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pilot-control")
}

pub fn get_config_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join("config")
}

pub fn get_logs_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join("logs")
}

pub fn get_outputs_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join("outputs")
}

pub fn get_telemetry_history_path(config_dir: &Path) -> PathBuf {
    config_dir.join("telemetry_history.jsonl")
}

pub fn initialize_data_directories(directories: &[&Path]) -> Result<()> {
    for dir in directories {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| ControlError::persistence(*dir, e))?;
            debug!("Created directory: {:?}", dir);
        }
    }
    Ok(())
}
