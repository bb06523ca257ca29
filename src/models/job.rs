// Background job data models
use crate::utils::RingBuffer;
use serde::{Deserialize, Serialize};

/// Tail capacity for asset pull jobs
pub const PULL_TAIL_CAPACITY: usize = 200;
/// Tail capacity for the training run
pub const TRAINING_TAIL_CAPACITY: usize = 4000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Done,
    Error,
}

/// Live record for one job key. Mutated only by the job's reader task.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub key: String,
    pub state: JobState,
    pub pid: Option<u32>,
    pub progress_percent: Option<u8>,
    pub last_line: String,
    pub error: Option<String>,
    pub started_at: f64,
    pub updated_at: f64,
    pub output_tail: RingBuffer<String>,
}

impl JobRecord {
    pub fn new(key: String, tail_capacity: usize, now: f64) -> Self {
        Self {
            key,
            state: JobState::Running,
            pid: None,
            progress_percent: None,
            last_line: String::new(),
            error: None,
            started_at: now,
            updated_at: now,
            output_tail: RingBuffer::new(tail_capacity),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// Advance `updated_at` without letting it fall behind `started_at`
    pub fn touch(&mut self, now: f64) {
        self.updated_at = now.max(self.started_at);
    }

    /// Terminal transition from a child exit code
    pub fn finish(&mut self, exit_code: i32, now: f64) {
        if exit_code == 0 {
            self.state = JobState::Done;
            self.progress_percent = Some(100);
            self.error = None;
        } else {
            self.fail(format!("exit code {}", exit_code), now);
        }
        self.touch(now);
    }

    pub fn fail(&mut self, reason: String, now: f64) {
        self.state = JobState::Error;
        self.error = Some(if reason.trim().is_empty() {
            "unknown error".to_string()
        } else {
            reason
        });
        self.touch(now);
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            key: self.key.clone(),
            state: self.state,
            pid: self.pid,
            progress_percent: self.progress_percent,
            last_line: self.last_line.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
            output_tail: self.output_tail.snapshot(),
        }
    }
}

/// Consistent copy of a [`JobRecord`] handed to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    pub key: String,
    pub state: JobState,
    pub pid: Option<u32>,
    pub progress_percent: Option<u8>,
    pub last_line: String,
    pub error: Option<String>,
    pub started_at: f64,
    pub updated_at: f64,
    pub output_tail: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    Idle,
}

/// Result of a job lookup: either an idle placeholder or a tracked record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JobStatus {
    Tracked(JobSnapshot),
    Idle { key: String, state: IdleState },
}

impl JobStatus {
    pub fn idle(key: &str) -> Self {
        JobStatus::Idle {
            key: key.to_string(),
            state: IdleState::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, JobStatus::Idle { .. })
    }

    pub fn tracked(&self) -> Option<&JobSnapshot> {
        match self {
            JobStatus::Tracked(snapshot) => Some(snapshot),
            JobStatus::Idle { .. } => None,
        }
    }
}

/// What to run for a job: argv, optional working directory, extra environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub workdir: Option<std::path::PathBuf>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            workdir: None,
            env: Vec::new(),
        }
    }

    pub fn workdir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }
}
