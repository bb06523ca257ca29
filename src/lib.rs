pub mod error;
pub mod file_manager;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod performance;
pub mod process_manager;
pub mod utils;

use error::Result;
use jobs::{ModelPulls, TrainingRunner};
use log::{info, warn};
use models::{
    HistoryWindow, JobSnapshot, JobState, JobStatus, Settings, TrainingRequest, TrainingStarted,
};
use parking_lot::Mutex;
use performance::{MonitoringState, PerformanceCollector, PointSource, TelemetryStore};
use process_manager::StopOutcome;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use utils::initialize_data_directories;

pub use error::ControlError;

/// Long-lived service object shared by request handlers
pub struct ControlPlane {
    settings: Settings,
    pulls: ModelPulls,
    training: TrainingRunner,
    telemetry: Arc<TelemetryStore>,
    monitoring: MonitoringState,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl ControlPlane {
    pub fn new(settings: Settings) -> Self {
        Self {
            pulls: ModelPulls::new(settings.pull_tool.clone(), settings.jobs.clone()),
            training: TrainingRunner::new(&settings),
            telemetry: Arc::new(TelemetryStore::new(settings.telemetry.clone())),
            monitoring: MonitoringState::default(),
            sampler: Mutex::new(None),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // Model pulls

    pub fn start_pull(&self, name: &str) -> Result<JobSnapshot> {
        self.pulls.start(name)
    }

    pub async fn stop_pull(&self, name: &str) -> Result<Option<StopOutcome>> {
        self.pulls.stop(name).await
    }

    pub fn pull_status(&self, name: &str) -> JobStatus {
        self.pulls.status(name)
    }

    pub fn list_pulls(&self) -> Vec<JobSnapshot> {
        self.pulls.list()
    }

    // Training

    pub fn start_training(&self, request: &TrainingRequest) -> Result<TrainingStarted> {
        self.training.start(request)
    }

    pub async fn stop_training(&self) -> Result<Option<StopOutcome>> {
        self.training.stop().await
    }

    pub fn training_status(&self) -> JobStatus {
        self.training.status()
    }

    pub fn training_logs(&self, limit: Option<usize>) -> Vec<String> {
        self.training.logs(limit)
    }

    // Telemetry

    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    pub fn telemetry_history(&self, max_seconds: Option<u64>) -> HistoryWindow {
        self.telemetry.query(max_seconds)
    }

    /// Start sampling host metrics; returns false if already sampling
    pub fn start_sampler(&self) -> Result<bool> {
        self.start_sampler_with(Box::new(PerformanceCollector::new()))
    }

    pub fn start_sampler_with(&self, source: Box<dyn PointSource>) -> Result<bool> {
        let interval = Duration::from_secs(self.settings.telemetry.sample_seconds);
        let handle =
            performance::start_sampler(self.telemetry.clone(), source, interval, &self.monitoring)?;
        match handle {
            Some(handle) => {
                *self.sampler.lock() = Some(handle);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop the sampler and wait for its thread; blocks for up to one tick
    pub fn stop_sampler(&self) {
        performance::stop_sampler(&self.monitoring);
        let handle = self.sampler.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Telemetry sampler thread panicked");
            }
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.monitoring.is_running()
    }

    /// Stop every running child and the sampler
    pub async fn shutdown(self: &Arc<Self>) {
        for pull in self.pulls.list().into_iter().filter(|p| p.state == JobState::Running) {
            if let Err(e) = self.pulls.stop(&pull.key).await {
                warn!("Failed to stop pull {}: {}", pull.key, e);
            }
        }
        if let Err(e) = self.training.stop().await {
            warn!("Failed to stop training: {}", e);
        }

        let plane = self.clone();
        if tokio::task::spawn_blocking(move || plane.stop_sampler())
            .await
            .is_err()
        {
            warn!("Sampler shutdown task failed");
        }
    }
}

/// Run the control plane until ctrl-c or SIGTERM
pub async fn run() -> Result<()> {
    let settings = Settings::from_env();
    let _log_guard = logging::init_logging(&settings);
    logging::cleanup_old_logs(&settings.logs_dir);

    let config_dir = settings.config_dir();
    initialize_data_directories(&[
        settings.workspace_root.as_path(),
        config_dir.as_path(),
        settings.logs_dir.as_path(),
    ])?;

    info!(
        "pilot-control {} starting in {:?}",
        env!("CARGO_PKG_VERSION"),
        settings.workspace_root
    );
    info!(
        "Telemetry: every {}s, keep {}s, compact every {}s, log {:?}",
        settings.telemetry.sample_seconds,
        settings.telemetry.retention_seconds,
        settings.telemetry.compaction_interval_seconds,
        settings.telemetry.history_path
    );

    let plane = Arc::new(ControlPlane::new(settings));
    plane.start_sampler()?;

    shutdown_signal().await;
    plane.shutdown().await;
    info!("pilot-control stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; stopping jobs");
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::TelemetryPoint;
    use std::time::Instant;

    struct FixedSource;

    impl PointSource for FixedSource {
        fn sample(&mut self) -> Result<TelemetryPoint> {
            Ok(TelemetryPoint {
                timestamp: utils::now_secs(),
                cpu: Default::default(),
                gpus: Vec::new(),
            })
        }
    }

    fn plane(dir: &tempfile::TempDir) -> Arc<ControlPlane> {
        let mut settings = Settings::for_workspace(dir.path());
        settings.telemetry.sample_seconds = 1;
        settings.pull_tool = dir.path().join("missing-pull-tool");
        Arc::new(ControlPlane::new(settings))
    }

    #[tokio::test]
    async fn test_idle_surface() {
        let dir = tempfile::tempdir().unwrap();
        let plane = plane(&dir);

        assert!(plane.pull_status("llama").is_idle());
        assert!(plane.training_status().is_idle());
        assert!(plane.list_pulls().is_empty());
        assert!(plane.training_logs(None).is_empty());
        assert!(plane.telemetry_history(None).points.is_empty());
        assert!(matches!(
            plane.start_pull("  "),
            Err(ControlError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_pull_tool_is_error_record() {
        let dir = tempfile::tempdir().unwrap();
        let plane = plane(&dir);

        let snapshot = plane.start_pull("llama").unwrap();
        assert_eq!(snapshot.state, JobState::Error);
        assert!(snapshot.error.is_some());
        assert_eq!(plane.list_pulls().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sampler_feeds_history_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let plane = plane(&dir);

        assert!(plane.start_sampler_with(Box::new(FixedSource)).unwrap());
        assert!(!plane.start_sampler_with(Box::new(FixedSource)).unwrap());

        let deadline = Instant::now() + Duration::from_secs(10);
        while plane.telemetry_history(None).points.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!plane.telemetry_history(None).points.is_empty());

        plane.shutdown().await;
        assert!(!plane.is_sampling());
        assert!(plane.settings().telemetry.history_path.exists());
    }
}
