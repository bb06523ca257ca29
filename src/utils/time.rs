use chrono::Utc;

/// Wall-clock time as fractional seconds since the Unix epoch
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
