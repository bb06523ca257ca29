// Training run management
// A single training launcher run at a time, tracked like any other job

use super::registry::JobRegistry;
use crate::error::{ControlError, Result};
use crate::models::{
    CommandSpec, JobSettings, JobStatus, Settings, TrainingProfile, TrainingRequest,
    TrainingStarted, TRAINING_TAIL_CAPACITY,
};
use crate::process_manager::StopOutcome;
use crate::utils::get_outputs_dir;
use log::info;
use std::path::{Path, PathBuf};

pub const TRAINING_JOB_KEY: &str = "trainpilot";
pub const DEFAULT_LOG_LIMIT: usize = 500;

pub struct TrainingRunner {
    registry: JobRegistry,
    launcher: PathBuf,
    default_toml: PathBuf,
    workspace_root: PathBuf,
}

impl TrainingRunner {
    pub fn new(settings: &Settings) -> Self {
        Self::with_paths(
            settings.jobs.clone(),
            settings.trainpilot_bin.clone(),
            settings.trainpilot_toml.clone(),
            settings.workspace_root.clone(),
        )
    }

    pub fn with_paths(
        jobs: JobSettings,
        launcher: PathBuf,
        default_toml: PathBuf,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            registry: JobRegistry::new("training", TRAINING_TAIL_CAPACITY, jobs),
            launcher,
            default_toml,
            workspace_root,
        }
    }

    /// Validate and launch a run. Validation failures are returned before any
    /// record exists; a failed spawn shows up as an `Error` record instead.
    pub fn start(&self, request: &TrainingRequest) -> Result<TrainingStarted> {
        if self.registry.is_running(TRAINING_JOB_KEY) {
            return Err(ControlError::InvalidRequest(
                "training is already running".to_string(),
            ));
        }

        let spec = self.build_command(request)?;
        let output_dir = spec
            .env
            .iter()
            .find(|(k, _)| k == "OUTPUT_NAME")
            .map(|(_, name)| get_outputs_dir(&self.workspace_root).join(name))
            .unwrap_or_else(|| get_outputs_dir(&self.workspace_root));

        let snapshot = self.registry.start_job(TRAINING_JOB_KEY, spec);
        info!(
            "Training run state {:?}, pid {:?}, output {:?}",
            snapshot.state, snapshot.pid, output_dir
        );

        Ok(TrainingStarted {
            status: if snapshot.pid.is_some() {
                "started".to_string()
            } else {
                "error".to_string()
            },
            pid: snapshot.pid,
            output_dir: output_dir.to_string_lossy().to_string(),
        })
    }

    pub async fn stop(&self) -> Result<Option<StopOutcome>> {
        self.registry
            .stop_job(TRAINING_JOB_KEY, self.registry.settings().stop_grace())
            .await
    }

    pub fn status(&self) -> JobStatus {
        self.registry.get_job(TRAINING_JOB_KEY)
    }

    pub fn is_running(&self) -> bool {
        self.registry.is_running(TRAINING_JOB_KEY)
    }

    /// Newest `limit` lines of launcher output
    pub fn logs(&self, limit: Option<usize>) -> Vec<String> {
        self.registry
            .tail(TRAINING_JOB_KEY, limit.unwrap_or(DEFAULT_LOG_LIMIT))
    }

    fn build_command(&self, request: &TrainingRequest) -> Result<CommandSpec> {
        let dataset_raw = request.dataset_name.trim();
        if dataset_raw.is_empty() {
            return Err(ControlError::InvalidRequest(
                "dataset_name is required".to_string(),
            ));
        }
        let dataset = base_name(dataset_raw);
        if dataset.is_empty() {
            return Err(ControlError::InvalidRequest(format!(
                "invalid dataset_name: {}",
                dataset_raw
            )));
        }

        let output_name = match request.output_name.trim() {
            "" => dataset.clone(),
            name => name.to_string(),
        };

        let profile = TrainingProfile::parse(&request.profile).ok_or_else(|| {
            ControlError::InvalidRequest(format!("invalid profile: {}", request.profile.trim()))
        })?;

        let toml_path = request
            .toml_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_toml.clone());
        if !toml_path.exists() {
            return Err(ControlError::InvalidRequest(format!(
                "TOML not found: {:?}",
                toml_path
            )));
        }

        check_launcher(&self.launcher)?;

        let mut spec = CommandSpec::new([self.launcher.to_string_lossy().to_string()])
            .env("NO_CONFIRM", "1")
            .env("DATASET_NAME", dataset)
            .env("OUTPUT_NAME", output_name)
            .env("PROFILE", profile.as_str())
            .env("TOML", toml_path.to_string_lossy())
            .env("WORKSPACE_ROOT", self.workspace_root.to_string_lossy());
        if let Some(parent) = self.launcher.parent().filter(|p| !p.as_os_str().is_empty()) {
            spec = spec.workdir(parent);
        }
        Ok(spec)
    }
}

fn base_name(raw: &str) -> String {
    Path::new(raw)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn check_launcher(launcher: &Path) -> Result<()> {
    if !launcher.is_file() {
        return Err(ControlError::InvalidRequest(format!(
            "training launcher not found at {:?}",
            launcher
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(launcher)
            .map(|meta| meta.permissions().mode())
            .unwrap_or(0);
        if mode & 0o111 == 0 {
            return Err(ControlError::InvalidRequest(format!(
                "training launcher not executable: {:?}",
                launcher
            )));
        }
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::JobState;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        runner: TrainingRunner,
    }

    fn fixture(script: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let launcher = dir.path().join("trainpilot.sh");
        std::fs::write(&launcher, script).unwrap();
        std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755)).unwrap();
        let toml = dir.path().join("newlora.toml");
        std::fs::write(&toml, "[model]\n").unwrap();

        let runner = TrainingRunner::with_paths(
            JobSettings::default(),
            launcher,
            toml,
            dir.path().join("workspace"),
        );
        Fixture { _dir: dir, runner }
    }

    async fn wait_finished(runner: &TrainingRunner) -> JobState {
        for _ in 0..200 {
            if let Some(snapshot) = runner.status().tracked() {
                if snapshot.state != JobState::Running {
                    return snapshot.state;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("training did not finish");
    }

    fn request(dataset: &str, profile: &str) -> TrainingRequest {
        TrainingRequest {
            dataset_name: dataset.to_string(),
            profile: profile.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_rejects_unknown_profile_without_record() {
        let fx = fixture("#!/bin/sh\nexit 0\n");
        let err = fx.runner.start(&request("cats", "ultra")).unwrap_err();
        assert!(matches!(err, ControlError::InvalidRequest(_)));
        assert!(fx.runner.status().is_idle());
    }

    #[tokio::test]
    async fn test_rejects_blank_dataset() {
        let fx = fixture("#!/bin/sh\nexit 0\n");
        assert!(matches!(
            fx.runner.start(&request("  ", "regular")),
            Err(ControlError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_passes_environment_to_launcher() {
        let fx = fixture(
            "#!/bin/sh\necho \"$DATASET_NAME|$OUTPUT_NAME|$PROFILE|$NO_CONFIRM\"\nexit 0\n",
        );
        let started = fx
            .runner
            .start(&request("/workspace/datasets/cats", ""))
            .unwrap();
        assert_eq!(started.status, "started");
        assert!(started.output_dir.ends_with("outputs/cats"));

        assert_eq!(wait_finished(&fx.runner).await, JobState::Done);
        assert_eq!(fx.runner.logs(None), vec!["cats|cats|regular|1"]);
    }

    #[tokio::test]
    async fn test_logs_respect_limit() {
        let fx = fixture("#!/bin/sh\nfor i in 1 2 3 4 5; do echo step $i; done\n");
        fx.runner.start(&request("dogs", "quick_test")).unwrap();
        wait_finished(&fx.runner).await;
        assert_eq!(fx.runner.logs(Some(2)), vec!["step 4", "step 5"]);
    }

    #[tokio::test]
    async fn test_stop_running_training() {
        let fx = fixture("#!/bin/sh\necho training\nsleep 30\n");
        fx.runner.start(&request("birds", "high_quality")).unwrap();
        assert!(fx.runner.is_running());
        assert!(matches!(
            fx.runner.start(&request("birds", "regular")),
            Err(ControlError::InvalidRequest(_))
        ));

        let outcome = fx.runner.stop().await.unwrap();
        assert_eq!(outcome, Some(StopOutcome::Terminated));
        assert_eq!(wait_finished(&fx.runner).await, JobState::Error);
    }
}
