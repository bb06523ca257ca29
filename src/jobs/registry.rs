// Keyed registry of background jobs
// At most one running job per key; finished jobs linger until their TTL expires

use crate::error::Result;
use crate::models::{CommandSpec, JobRecord, JobSettings, JobSnapshot, JobStatus};
use crate::process_manager::{apply_line, spawn_supervised, OutputLines, ProcessHandle, StopOutcome};
use crate::utils::now_secs;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Where a job's child is in its lifecycle
#[derive(Clone)]
enum ProcessSlot {
    /// Key reserved, spawn in flight
    Starting,
    Attached(ProcessHandle),
    /// Spawn failed or the child has exited
    Released,
}

struct JobEntry {
    record: Mutex<JobRecord>,
    process: watch::Sender<ProcessSlot>,
}

impl JobEntry {
    fn new(record: JobRecord, slot: ProcessSlot) -> Self {
        Self {
            record: Mutex::new(record),
            process: watch::channel(slot).0,
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        self.record.lock().snapshot()
    }

    /// Entries whose spawn has not resolved are hidden from readers
    fn is_starting(&self) -> bool {
        matches!(*self.process.borrow(), ProcessSlot::Starting)
    }
}

/// Lock order: the map lock may be held while taking a record lock, never the
/// reverse.
pub struct JobRegistry {
    label: &'static str,
    jobs: Mutex<HashMap<String, Arc<JobEntry>>>,
    tail_capacity: usize,
    settings: JobSettings,
}

impl JobRegistry {
    pub fn new(label: &'static str, tail_capacity: usize, settings: JobSettings) -> Self {
        Self {
            label,
            jobs: Mutex::new(HashMap::new()),
            tail_capacity,
            settings,
        }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Start `spec` under `key`, or return the record already running there.
    ///
    /// Spawn failures come back as an `Error`-state record, not as an `Err`.
    /// Must be called from within a tokio runtime.
    pub fn start_job(&self, key: &str, spec: CommandSpec) -> JobSnapshot {
        let now = now_secs();
        self.collect_garbage(now);

        let entry = match self.reserve(key, now) {
            Ok(entry) => entry,
            Err(existing) => return existing,
        };

        info!("[{}] Starting {}: {:?}", self.label, key, spec.argv);
        self.launch(&entry, &spec)
    }

    /// Claim `key` with a fresh record, unless a job is already running there
    fn reserve(&self, key: &str, now: f64) -> std::result::Result<Arc<JobEntry>, JobSnapshot> {
        let mut jobs = self.jobs.lock();
        if let Some(existing) = jobs.get(key) {
            let record = existing.record.lock();
            if record.is_running() {
                debug!("[{}] {} already running, returning existing record", self.label, key);
                return Err(record.snapshot());
            }
        }
        let entry = Arc::new(JobEntry::new(
            JobRecord::new(key.to_string(), self.tail_capacity, now),
            ProcessSlot::Starting,
        ));
        jobs.insert(key.to_string(), entry.clone());
        Ok(entry)
    }

    /// Spawn the child for a reserved entry and hand its output to a reader task
    fn launch(&self, entry: &Arc<JobEntry>, spec: &CommandSpec) -> JobSnapshot {
        let spawned = spawn_supervised(spec)
            .and_then(|handle| handle.take_output().map(|output| (handle, output)));

        let (handle, output) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                let snapshot = {
                    let mut record = entry.record.lock();
                    error!("[{}] Failed to start {}: {}", self.label, record.key, e);
                    record.fail(e.to_string(), now_secs());
                    record.snapshot()
                };
                entry.process.send_replace(ProcessSlot::Released);
                return snapshot;
            }
        };

        {
            let mut record = entry.record.lock();
            record.pid = Some(handle.pid());
            record.touch(now_secs());
        }
        entry
            .process
            .send_replace(ProcessSlot::Attached(handle.clone()));

        tokio::spawn(run_reader(
            self.label,
            entry.clone(),
            handle,
            output,
            self.settings.monotonic_progress,
        ));

        entry.snapshot()
    }

    /// Stop the running job under `key`. `Ok(None)` when nothing is running.
    ///
    /// A stop that arrives while the spawn is in flight waits for it (bounded
    /// by `grace`) and then stops the new child. The final state is left to
    /// the reader task's exit handling.
    pub async fn stop_job(&self, key: &str, grace: Duration) -> Result<Option<StopOutcome>> {
        self.collect_garbage(now_secs());

        let entry = self.jobs.lock().get(key).cloned();
        let Some(entry) = entry else {
            return Ok(None);
        };
        if !entry.record.lock().is_running() {
            return Ok(None);
        }

        let mut slots = entry.process.subscribe();
        let settled = tokio::time::timeout(grace, async {
            slots
                .wait_for(|slot| !matches!(slot, ProcessSlot::Starting))
                .await
                .map(|slot| slot.clone())
        })
        .await;

        let handle = match settled {
            Ok(Ok(ProcessSlot::Attached(handle))) => handle,
            Ok(_) => return Ok(None),
            Err(_) => {
                warn!(
                    "[{}] {} still starting after {:?}, stop skipped",
                    self.label, key, grace
                );
                return Ok(None);
            }
        };

        info!("[{}] Stopping {} (pid {})", self.label, key, handle.pid());
        let outcome = handle.stop(grace).await?;
        debug!("[{}] Stop of {} finished: {:?}", self.label, key, outcome);
        Ok(Some(outcome))
    }

    pub fn get_job(&self, key: &str) -> JobStatus {
        self.collect_garbage(now_secs());
        let entry = self.jobs.lock().get(key).cloned();
        match entry {
            Some(entry) if !entry.is_starting() => JobStatus::Tracked(entry.snapshot()),
            _ => JobStatus::idle(key),
        }
    }

    /// Newest `limit` output lines for `key`
    pub fn tail(&self, key: &str, limit: usize) -> Vec<String> {
        self.collect_garbage(now_secs());
        let entry = self.jobs.lock().get(key).cloned();
        entry
            .filter(|entry| !entry.is_starting())
            .map(|entry| entry.record.lock().output_tail.tail(limit))
            .unwrap_or_default()
    }

    /// All tracked jobs, most recently updated first
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.collect_garbage(now_secs());
        let entries: Vec<Arc<JobEntry>> = self.jobs.lock().values().cloned().collect();
        let mut jobs: Vec<JobSnapshot> = entries
            .iter()
            .filter(|e| !e.is_starting())
            .map(|e| e.snapshot())
            .collect();
        jobs.sort_by(|a, b| b.updated_at.total_cmp(&a.updated_at));
        jobs
    }

    /// True while a job holds `key`, including a spawn still in flight
    pub fn is_running(&self, key: &str) -> bool {
        self.collect_garbage(now_secs());
        let entry = self.jobs.lock().get(key).cloned();
        entry.map_or(false, |entry| entry.record.lock().is_running())
    }

    /// Drop finished records whose last update is older than the TTL.
    /// Returns the number removed.
    pub fn collect_garbage(&self, now: f64) -> usize {
        let ttl = self.settings.ttl().as_secs_f64();
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, entry| {
            let record = entry.record.lock();
            record.is_running() || (now - record.updated_at) <= ttl
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!("[{}] Evicted {} finished job(s)", self.label, removed);
        }
        removed
    }

    #[cfg(test)]
    fn insert_record(&self, record: JobRecord) {
        self.jobs.lock().insert(
            record.key.clone(),
            Arc::new(JobEntry::new(record, ProcessSlot::Released)),
        );
    }
}

async fn run_reader(
    label: &'static str,
    entry: Arc<JobEntry>,
    handle: ProcessHandle,
    mut output: OutputLines,
    monotonic: bool,
) {
    while let Some(line) = output.next_line().await {
        let mut record = entry.record.lock();
        apply_line(&mut record, &line, now_secs(), monotonic);
    }

    let code = handle.wait().await;

    {
        let mut record = entry.record.lock();
        record.finish(code, now_secs());
        if code == 0 {
            info!("[{}] {} finished", label, record.key);
        } else {
            warn!("[{}] {} failed with exit code {}", label, record.key, code);
        }
    }
    entry.process.send_replace(ProcessSlot::Released);
}
