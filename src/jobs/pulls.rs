// Model pull jobs, one per model name
use super::registry::JobRegistry;
use crate::error::{ControlError, Result};
use crate::models::{CommandSpec, JobSettings, JobSnapshot, JobStatus, PULL_TAIL_CAPACITY};
use crate::process_manager::StopOutcome;
use std::path::PathBuf;

const PROGRESS_BARS_VAR: &str = "HF_HUB_DISABLE_PROGRESS_BARS";

pub struct ModelPulls {
    registry: JobRegistry,
    pull_tool: PathBuf,
}

impl ModelPulls {
    pub fn new(pull_tool: PathBuf, jobs: JobSettings) -> Self {
        Self {
            registry: JobRegistry::new("pulls", PULL_TAIL_CAPACITY, jobs),
            pull_tool,
        }
    }

    /// Start pulling `name` in the background, or return the pull already running
    pub fn start(&self, name: &str) -> Result<JobSnapshot> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ControlError::InvalidRequest(
                "model name is required".to_string(),
            ));
        }
        Ok(self.registry.start_job(name, self.pull_command(name)))
    }

    pub async fn stop(&self, name: &str) -> Result<Option<StopOutcome>> {
        self.registry
            .stop_job(name, self.registry.settings().stop_grace())
            .await
    }

    pub fn status(&self, name: &str) -> JobStatus {
        self.registry.get_job(name)
    }

    pub fn list(&self) -> Vec<JobSnapshot> {
        self.registry.list_jobs()
    }

    fn pull_command(&self, name: &str) -> CommandSpec {
        let spec = CommandSpec::new([
            self.pull_tool.to_string_lossy().to_string(),
            "pull".to_string(),
            name.to_string(),
        ]);
        // Keep the tool's progress bars on unless the operator chose otherwise.
        if std::env::var_os(PROGRESS_BARS_VAR).is_none() {
            spec.env(PROGRESS_BARS_VAR, "0")
        } else {
            spec
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::JobState;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    #[test]
    fn test_blank_name_is_rejected() {
        let pulls = ModelPulls::new("/bin/true".into(), JobSettings::default());
        assert!(matches!(
            pulls.start("  "),
            Err(ControlError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_pull_passes_name_and_tracks_progress() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("get-models.sh");
        std::fs::write(
            &tool,
            "#!/bin/sh\nprintf 'pulling %s\\n' \"$2\"\nprintf '25%%\\r75%%\\r'\necho done\n",
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let pulls = ModelPulls::new(tool, JobSettings::default());
        pulls.start("sdxl").unwrap();

        let mut finished = None;
        for _ in 0..200 {
            if let Some(snapshot) = pulls.status("sdxl").tracked() {
                if snapshot.state != JobState::Running {
                    finished = Some(snapshot.clone());
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        let finished = finished.expect("pull finished");
        assert_eq!(finished.state, JobState::Done);
        assert_eq!(
            finished.output_tail,
            vec!["pulling sdxl", "25%", "75%", "done"]
        );
        assert_eq!(pulls.list().len(), 1);
    }
}
