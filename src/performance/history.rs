// Telemetry history store
// In-memory window of points backed by a JSON-lines log that is periodically compacted
use crate::error::Result;
use crate::file_manager::{append_json_line, read_json_lines, write_json_lines};
use crate::models::settings::TelemetrySettings;
use crate::models::telemetry::{HistoryWindow, TelemetryPoint};
use crate::utils::now_secs;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;

/// What a single append did besides recording the point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub pruned: usize,
    pub compacted: bool,
}

struct HistoryState {
    points: VecDeque<TelemetryPoint>,
    /// Timestamp of the newest point at the last successful compaction
    last_compaction: Option<f64>,
}

impl HistoryState {
    /// Drop points older than `retention` seconds before the newest one
    fn prune(&mut self, retention: f64) -> usize {
        let newest = match self.points.back() {
            Some(point) => point.timestamp,
            None => return 0,
        };
        let cutoff = newest - retention;
        let before = self.points.len();
        while self
            .points
            .front()
            .map_or(false, |point| point.timestamp < cutoff)
        {
            self.points.pop_front();
        }
        before - self.points.len()
    }

    fn insert_ordered(&mut self, point: TelemetryPoint) {
        let at = self
            .points
            .partition_point(|p| p.timestamp <= point.timestamp);
        self.points.insert(at, point);
    }
}

/// Lock order: `io` before `state`. Readers only take `state`.
pub struct TelemetryStore {
    config: TelemetrySettings,
    state: Mutex<HistoryState>,
    /// Serializes appends so a compaction snapshot never lands over a newer line
    io: Mutex<()>,
}

impl TelemetryStore {
    pub fn new(config: TelemetrySettings) -> Self {
        Self {
            config,
            state: Mutex::new(HistoryState {
                points: VecDeque::new(),
                last_compaction: None,
            }),
            io: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &TelemetrySettings {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.history_path
    }

    pub fn len(&self) -> usize {
        self.state.lock().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a point. The in-memory update always succeeds; disk failures
    /// are logged and retried implicitly by later appends and compactions.
    /// Concurrent appends are applied one at a time.
    pub fn append(&self, point: TelemetryPoint) -> AppendOutcome {
        let _io = self.io.lock();
        let retention = self.config.retention_seconds as f64;
        let interval = self.config.compaction_interval_seconds as f64;

        let (pruned, compaction) = {
            let mut state = self.state.lock();
            state.insert_ordered(point.clone());
            let pruned = state.prune(retention);

            let newest = state.points.back().map_or(point.timestamp, |p| p.timestamp);
            let due = match state.last_compaction {
                None => true,
                Some(last) => newest - last > interval,
            };
            let compaction = if pruned > 0 || due {
                Some((newest, state.points.iter().cloned().collect::<Vec<_>>()))
            } else {
                None
            };
            (pruned, compaction)
        };

        if let Err(e) = append_json_line(self.path(), &point) {
            warn!("Failed to persist telemetry point: {}", e);
        }

        let mut compacted = false;
        if let Some((newest, snapshot)) = compaction {
            match write_json_lines(self.path(), &snapshot) {
                Ok(()) => {
                    let mut state = self.state.lock();
                    if state.last_compaction.map_or(true, |last| last < newest) {
                        state.last_compaction = Some(newest);
                    }
                    compacted = true;
                    debug!(
                        "Compacted telemetry history to {} point(s), pruned {}",
                        snapshot.len(),
                        pruned
                    );
                }
                Err(e) => warn!("Telemetry compaction failed: {}", e),
            }
        }

        AppendOutcome { pruned, compacted }
    }

    /// Retained points, optionally limited to `max_seconds` before the newest.
    /// `Some(0)` behaves like `None`.
    pub fn query(&self, max_seconds: Option<u64>) -> HistoryWindow {
        let mut state = self.state.lock();
        state.prune(self.config.retention_seconds as f64);

        let newest = match state.points.back() {
            Some(point) => point.timestamp,
            None => {
                return HistoryWindow::empty(
                    self.config.sample_seconds,
                    self.config.retention_seconds,
                )
            }
        };

        let points: Vec<TelemetryPoint> = match max_seconds.filter(|&s| s > 0) {
            Some(seconds) => {
                let cutoff = newest - seconds as f64;
                state
                    .points
                    .iter()
                    .filter(|p| p.timestamp >= cutoff)
                    .cloned()
                    .collect()
            }
            None => state.points.iter().cloned().collect(),
        };

        let from_ts = points.first().map(|p| p.timestamp);
        let to_ts = points.last().map(|p| p.timestamp);
        HistoryWindow {
            sample_seconds: self.config.sample_seconds,
            retention_seconds: self.config.retention_seconds,
            available_seconds: match (from_ts, to_ts) {
                (Some(from), Some(to)) => (to - from).max(0.0),
                _ => 0.0,
            },
            from_ts,
            to_ts,
            points,
        }
    }

    /// Seed the store from the durable log; returns the number of points kept
    pub fn load_from_disk(&self) -> Result<usize> {
        self.load_from_disk_at(now_secs())
    }

    pub fn load_from_disk_at(&self, now: f64) -> Result<usize> {
        let cutoff = now - self.config.retention_seconds as f64;
        let mut points: Vec<TelemetryPoint> = read_json_lines(self.path())?;
        points.retain(|p| p.timestamp.is_finite() && p.timestamp >= cutoff);
        points.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let count = points.len();
        let mut state = self.state.lock();
        state.points = points.into();
        state.last_compaction = None;
        info!(
            "Loaded {} telemetry point(s) from {:?}",
            count,
            self.config.history_path
        );
        Ok(count)
    }
}
