//! Logging setup for the control plane
//! Routes `log` records through tracing-subscriber to stderr and a daily file,
//! and handles log file cleanup for 7-day retention

use crate::models::Settings;
use log::{info, warn};
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_RETENTION_DAYS: u64 = 7;
pub const LOG_FILE_PREFIX: &str = "pilot-control.log";

/// Keeps the file writer alive; dropping it flushes pending records
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber. Falls back to stderr only when the log
/// directory is unusable. Calling this twice leaves the first subscriber in place.
pub fn init_logging(settings: &Settings) -> LoggingGuard {
    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_writer, file_guard) = match fs::create_dir_all(&settings.logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&settings.logs_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        Err(e) => {
            eprintln!("log directory {:?} unavailable: {}", settings.logs_dir, e);
            (None, None)
        }
    };

    let json = settings.log_json;
    let stderr_text = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));
    let stderr_json = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
    });
    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_text)
        .with(stderr_json)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        warn!("Logging already initialized");
    }

    LoggingGuard {
        _file_guard: file_guard,
    }
}

/// Remove our log files older than the retention period
pub fn cleanup_old_logs(logs_dir: &Path) -> usize {
    cleanup_logs_older_than(
        logs_dir,
        Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60),
    )
}

fn cleanup_logs_older_than(logs_dir: &Path, retention: Duration) -> usize {
    if !logs_dir.exists() {
        return 0;
    }

    let now = SystemTime::now();
    let mut removed = 0;

    if let Ok(entries) = fs::read_dir(logs_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ours = path
                .file_name()
                .map_or(false, |name| name.to_string_lossy().starts_with(LOG_FILE_PREFIX));
            if !ours || !path.is_file() {
                continue;
            }
            let age = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if let Some(age) = age {
                if age >= retention && fs::remove_file(&path).is_ok() {
                    info!("Cleaned up old log: {:?}", path.file_name());
                    removed += 1;
                }
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_only_touches_our_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pilot-control.log.2026-01-01"), "old").unwrap();
        fs::write(dir.path().join("other.log"), "keep").unwrap();

        assert_eq!(cleanup_logs_older_than(dir.path(), Duration::ZERO), 1);
        assert!(dir.path().join("other.log").exists());
    }

    #[test]
    fn test_cleanup_keeps_recent_logs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pilot-control.log.2026-01-01"), "new").unwrap();
        assert_eq!(cleanup_old_logs(dir.path()), 0);
    }

    #[test]
    fn test_cleanup_missing_dir() {
        assert_eq!(cleanup_old_logs(Path::new("/nonexistent/pilot-logs")), 0);
    }
}
