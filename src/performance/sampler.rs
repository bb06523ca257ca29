// Background telemetry sampling loop
use super::collector::PointSource;
use super::history::TelemetryStore;
use crate::error::{ControlError, Result};
use log::{debug, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound on one sleep so a stop request is noticed promptly
const STOP_POLL: Duration = Duration::from_secs(1);

/// State for tracking if sampling is active
pub struct MonitoringState {
    pub is_running: Arc<AtomicBool>,
}

impl Default for MonitoringState {
    fn default() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl MonitoringState {
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

/// Start the sampler thread. The store is seeded from disk first.
/// Returns `Ok(None)` if a sampler is already running.
pub fn start_sampler(
    store: Arc<TelemetryStore>,
    mut source: Box<dyn PointSource>,
    interval: Duration,
    state: &MonitoringState,
) -> Result<Option<JoinHandle<()>>> {
    if state.is_running.swap(true, Ordering::SeqCst) {
        debug!("Telemetry sampler already running");
        return Ok(None);
    }

    let is_running = state.is_running.clone();
    let interval = interval.max(Duration::from_millis(10));

    let handle = thread::Builder::new()
        .name("telemetry-sampler".to_string())
        .spawn(move || {
            if let Err(e) = store.load_from_disk() {
                warn!("Could not load telemetry history: {}", e);
            }
            info!("Telemetry sampler started, interval {:?}", interval);

            let mut next_tick = Instant::now();
            while is_running.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now < next_tick {
                    thread::sleep((next_tick - now).min(STOP_POLL));
                    continue;
                }
                next_tick = now + interval;

                match panic::catch_unwind(AssertUnwindSafe(|| source.sample())) {
                    Ok(Ok(point)) => {
                        store.append(point);
                    }
                    Ok(Err(e)) => warn!("Telemetry sample skipped: {}", e),
                    Err(_) => warn!("Telemetry sample panicked; continuing"),
                }
            }
            info!("Telemetry sampler stopped");
        });

    match handle {
        Ok(handle) => Ok(Some(handle)),
        Err(e) => {
            state.is_running.store(false, Ordering::SeqCst);
            Err(ControlError::Sampling(format!(
                "could not start sampler thread: {}",
                e
            )))
        }
    }
}

/// Ask the sampler to exit after its current tick
pub fn stop_sampler(state: &MonitoringState) {
    state.is_running.store(false, Ordering::SeqCst);
}
