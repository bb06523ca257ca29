// Error types shared by the job registry, process supervisor and telemetry store
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Executable missing, not executable, or bad working directory
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to signal process group {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },

    /// One telemetry collection pass failed
    #[error("telemetry sampling failed: {0}")]
    Sampling(String),

    /// Durable log write or compaction failed
    #[error("persistence failure on {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("process output was already taken")]
    OutputTaken,
}

impl ControlError {
    pub fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ControlError::Persistence {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
